use stmtflow::ast::{Arena, BinOp, ExprId, Expression, Variable};
use stmtflow::flow::{EdgeKind, FlowGraph, NodeId, NodeKind, Visit};
use stmtflow::stats::{LoopKind, StatEdgeKind, StatId, StatementKind, StatementTree};
use stmtflow::{FlattenError, flatten_statements};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
        )
        .with_test_writer()
        .try_init();
}

struct Method {
    arena: Arena,
    tree: StatementTree,
    prologue: StatId,
    looping: StatId,
    body: StatId,
    epilogue: StatId,
    dead: ExprId,
    init: ExprId,
    limit: ExprId,
}

// log("start"); x = 0; while (x < 10) { x = x + 1; } return x;
fn counting_method() -> Method {
    let mut arena = Arena::new();
    let mut tree = StatementTree::new();
    let x = Variable::new(1, 0);

    let message = arena.alloc(Expression::ConstString("start".to_owned()));
    let dead = arena.alloc(Expression::Call {
        object: None,
        method_name: "log".to_owned(),
        arguments: vec![message],
    });
    let target = arena.var(x);
    let zero = arena.int(0);
    let init = arena.alloc(Expression::Assign {
        target,
        value: zero,
    });

    let lhs = arena.var(x);
    let limit = arena.int(10);
    let condition = arena.alloc(Expression::BinOp {
        op: BinOp::Lt,
        lhs,
        rhs: limit,
    });

    let lhs = arena.var(x);
    let one = arena.int(1);
    let value = arena.alloc(Expression::BinOp {
        op: BinOp::Add,
        lhs,
        rhs: one,
    });
    let target = arena.var(x);
    let step = arena.alloc(Expression::Assign { target, value });

    let result = arena.var(x);
    let ret = arena.alloc(Expression::Return {
        value: Some(result),
    });

    let prologue = tree.basic_block(vec![dead, init]);
    let body = tree.basic_block(vec![step]);
    let looping = tree.add(
        StatementKind::Loop {
            kind: LoopKind::While,
            init: None,
            condition: Some(condition),
            increment: None,
        },
        vec![body],
    );
    let epilogue = tree.basic_block(vec![ret]);
    let seq = tree.add(StatementKind::Sequence, vec![prologue, looping, epilogue]);
    tree.set_root(seq);

    let exit = tree.dummy_exit();
    tree.add_edge(StatEdgeKind::Regular, prologue, looping);
    tree.add_edge(StatEdgeKind::Continue, body, looping);
    tree.add_edge(StatEdgeKind::Regular, looping, epilogue);
    tree.add_edge(StatEdgeKind::Regular, epilogue, exit);

    Method {
        arena,
        tree,
        prologue,
        looping,
        body,
        epilogue,
        dead,
        init,
        limit,
    }
}

fn flatten(tree: &StatementTree) -> FlowGraph {
    match flatten_statements(tree) {
        Ok(graph) => graph,
        Err(err) => panic!("flattening failed: {err}"),
    }
}

#[test]
fn counting_loop_graph() {
    init_tracing();
    let method = counting_method();
    let graph = flatten(&method.tree);

    let prologue = NodeId::direct(method.prologue);
    let cond = NodeId::new(method.looping, NodeKind::Condition);
    let body = NodeId::direct(method.body);
    let epilogue = NodeId::direct(method.epilogue);
    let exit = NodeId::direct(method.tree.dummy_exit());

    assert_eq!(graph.entry(), Some(prologue));
    assert_eq!(graph.dummy_exit(), Some(exit));
    assert_eq!(graph.len(), 5);
    assert!(graph.extra_nodes().is_empty());

    let order: Vec<NodeId> = graph.node_ids().collect();
    assert_eq!(order[0], prologue);
    assert_eq!(order[1], cond);
    let position = |id: NodeId| order.iter().position(|other| *other == id).unwrap();
    assert!(position(cond) < position(body));
    assert!(position(epilogue) < position(exit));

    let edges: Vec<String> = graph
        .nodes()
        .flat_map(|node| node.successors(EdgeKind::Regular).iter())
        .map(ToString::to_string)
        .collect();
    assert!(edges.contains(&format!("{} -regular-> {}", cond, body)));
    assert!(edges.contains(&format!("{} -regular-> {}", body, cond)));
    assert_eq!(cond.to_string(), format!("{}_cond", method.looping));
}

#[test]
fn passes_edit_expressions_in_place() {
    init_tracing();
    let mut method = counting_method();
    let mut graph = flatten(&method.tree);

    let mut seen = Vec::new();
    let completed = graph.iterate_exprents(|expr| {
        seen.push(expr);
        if expr == method.dead {
            Visit::Delete
        } else {
            Visit::Continue
        }
    });
    assert!(completed);
    assert_eq!(seen.len(), 5);

    graph.commit_block_exprents(&mut method.tree);
    let StatementKind::BasicBlock { exprents, .. } = &method.tree[method.prologue].kind else {
        panic!("prologue is not a basic block");
    };
    assert_eq!(exprents, &[method.init]);

    let mut found_limit = false;
    let completed = graph.iterate_exprents_deep(&method.arena, |expr| {
        found_limit |= expr == method.limit;
        if found_limit { Visit::Stop } else { Visit::Continue }
    });
    assert!(!completed);
    assert!(found_limit);
}

#[test]
fn deep_rewrites_replace_the_enclosing_expression() {
    init_tracing();
    let mut method = counting_method();
    let replacement = method.arena.alloc(Expression::Return { value: None });
    let mut graph = flatten(&method.tree);

    let arena = &method.arena;
    let completed = graph.iterate_exprents_deep(arena, |expr| {
        if matches!(arena[expr], Expression::ConstString(_)) {
            Visit::Replace(replacement)
        } else {
            Visit::Continue
        }
    });
    assert!(completed);

    let prologue = graph.node(NodeId::direct(method.prologue)).unwrap();
    assert_eq!(prologue.exprents, [replacement, method.init]);
}

#[test]
fn later_passes_can_extend_the_graph() {
    init_tracing();
    let method = counting_method();
    let mut graph = flatten(&method.tree);

    let prologue = NodeId::direct(method.prologue);
    let epilogue = NodeId::direct(method.epilogue);
    let orphan = NodeId::new(method.epilogue, NodeKind::Tail);

    graph.add_node(orphan, Vec::new());
    assert!(
        graph
            .add_edge(stmtflow::flow::FlowEdge::regular(orphan, epilogue))
            .unwrap()
    );
    graph.normalize();

    assert_eq!(graph.extra_nodes(), [orphan]);
    assert_eq!(graph.node_ids().next(), Some(orphan));
    assert_eq!(graph.node_ids().nth(1), Some(prologue));
}

#[test]
fn malformed_tree_is_reported() {
    init_tracing();
    let mut tree = StatementTree::new();
    let looping = tree.add(StatementKind::loop_(LoopKind::Infinite), Vec::new());
    tree.set_root(looping);

    let err = flatten_statements(&tree).unwrap_err();
    assert!(matches!(err, FlattenError::MissingChild { statement } if statement == looping));
}

#[test]
fn graphs_can_move_between_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<FlowGraph>();
    assert_send_sync::<StatementTree>();
    assert_send_sync::<Arena>();
    assert_send_sync::<FlattenError>();

    let method = counting_method();
    let tree = method.tree;
    let len = std::thread::spawn(move || flatten(&tree).len())
        .join()
        .unwrap();
    assert_eq!(len, 5);
}
