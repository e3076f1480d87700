//! Routing of control transfers through `finally` handlers.
//!
//! A `finally` block is compiled once but runs on every path leaving its protected body. When an
//! edge leaves the protected region, the builder redirects it into the handler and re-walks the
//! handler with a frame remembering where the transfer was originally headed. When the handler
//! later completes through a finally-exit edge, that frame is popped and the original transfer is
//! resumed, and the path through the handler is recorded in the path tables.

use super::flatten::{Builder, DeferredEdge, FlattenError, Frame, PathRow, PendingExits};
use super::{NodeId, Target};
use crate::stats::{StatEdge, StatEdgeKind, StatId, StatementKind};
use tracing::trace;

pub(super) type FinallyStack = Vec<FinallyFrame>;

#[derive(Clone, Copy, Debug)]
pub(super) enum FinallyFrame {
    /// Inside the protected body of a `finally` catch-all.
    Protected { catch_all: StatId },
    /// Inside its handler. `resume` describes the transfer to continue once the handler completes.
    Handler {
        catch_all: StatId,
        resume: FinallyResume,
    },
}

impl FinallyFrame {
    fn catch_all(self) -> StatId {
        match self {
            Self::Protected { catch_all } | Self::Handler { catch_all, .. } => catch_all,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(super) struct FinallyResume {
    pub kind: StatEdgeKind,
    pub destination: StatId,
    /// The handler entered by the innermost reroute.
    pub short_entry: StatId,
    /// The handler entered by the outermost reroute.
    pub long_entry: StatId,
    pub short_source: NodeId,
    pub long_source: NodeId,
    /// Whether the handler was entered because of an exception rather than a reroute.
    pub exception_path: bool,
}

/// A control transfer being routed, possibly rewritten by handlers it has passed through.
#[derive(Clone, Copy, Debug)]
pub(super) struct Transfer {
    kind: StatEdgeKind,
    destination: StatId,
    short_source: NodeId,
    long_source: NodeId,
    short_entry: Option<StatId>,
    long_entry: Option<StatId>,
    monitor_exception_path: bool,
    // Set once a handler has been left through a finally exit; only then are paths recorded.
    finally_exit: bool,
}

impl Transfer {
    fn new(source: NodeId, edge: StatEdge) -> Self {
        Self {
            kind: edge.kind,
            destination: edge.destination,
            short_source: source,
            long_source: source,
            short_entry: None,
            long_entry: None,
            monitor_exception_path: false,
            finally_exit: false,
        }
    }

    fn resume(&mut self, resume: FinallyResume, has_monitor: bool) {
        self.kind = resume.kind;
        self.destination = resume.destination;
        self.short_source = resume.short_source;
        self.long_source = resume.long_source;
        self.short_entry = Some(resume.short_entry);
        self.long_entry = Some(resume.long_entry);
        self.monitor_exception_path = has_monitor && resume.exception_path;
        self.finally_exit = true;
    }
}

impl Builder<'_> {
    /// Records the outgoing edges of `pending.source`, starting from `pending.next`.
    ///
    /// If an edge has to be routed through a `finally` handler, the handler is scheduled for
    /// another visit and the remaining edges are deferred until that visit completes.
    pub(super) fn route_exits(&mut self, mut pending: PendingExits) -> Result<(), FlattenError> {
        while let Some(&edge) = pending.edges.get(pending.next) {
            pending.next += 1;

            let source = pending.source;
            let mut transfer = Transfer::new(source, edge);
            let mut stack = pending.finally.clone();

            loop {
                let Some(&frame) = stack.last() else {
                    self.save_edge(source, transfer.destination, transfer.kind, &transfer);
                    break;
                };
                let catch_all = frame.catch_all();
                let escapes = !self.tree.contains_strict(catch_all, transfer.destination);

                match frame {
                    FinallyFrame::Handler { resume, .. }
                        if transfer.kind == StatEdgeKind::FinallyExit =>
                    {
                        stack.pop();
                        transfer.resume(resume, self.has_monitor(catch_all));
                    }
                    FinallyFrame::Handler { .. } if escapes => {
                        stack.pop();
                    }
                    FinallyFrame::Protected { .. } if escapes => {
                        let handler = self
                            .tree
                            .handler(catch_all)
                            .ok_or(FlattenError::MissingChild {
                                statement: catch_all,
                            })?;
                        trace!(
                            %source,
                            destination = %transfer.destination,
                            %handler,
                            "routing transfer through finally handler",
                        );

                        // Keeps variable scopes between the source and the original destination
                        // connected.
                        self.deferred.push(DeferredEdge {
                            source,
                            target: Target::Stat(transfer.destination),
                            kind: transfer.kind,
                        });
                        self.save_edge(source, handler, StatEdgeKind::Regular, &transfer);

                        stack.pop();
                        stack.push(FinallyFrame::Handler {
                            catch_all,
                            resume: FinallyResume {
                                kind: transfer.kind,
                                destination: transfer.destination,
                                short_entry: handler,
                                long_entry: transfer.long_entry.unwrap_or(handler),
                                short_source: source,
                                long_source: transfer.long_source,
                                exception_path: false,
                            },
                        });

                        self.work.push(Frame::Exits(pending));
                        self.work.push(Frame::Visit {
                            stat: handler,
                            finally: stack,
                            tail: None,
                        });
                        return Ok(());
                    }
                    _ => {
                        self.save_edge(source, transfer.destination, transfer.kind, &transfer);
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn save_edge(
        &mut self,
        source: NodeId,
        destination: StatId,
        kind: StatEdgeKind,
        transfer: &Transfer,
    ) {
        if kind != StatEdgeKind::FinallyExit {
            self.deferred.push(DeferredEdge {
                source,
                target: Target::Stat(destination),
                kind,
            });
        }

        if transfer.finally_exit
            && let (Some(short_entry), Some(long_entry)) = (transfer.short_entry, transfer.long_entry)
        {
            let is_continue = kind == StatEdgeKind::Continue;
            self.short_rows.entry(source).or_default().push(PathRow {
                source: transfer.short_source,
                destination,
                entry: short_entry,
                is_continue,
                monitor_exception_path: transfer.monitor_exception_path,
            });
            self.long_rows.entry(source).or_default().push(PathRow {
                source: transfer.long_source,
                destination,
                entry: long_entry,
                is_continue,
                monitor_exception_path: false,
            });
        }
    }

    fn has_monitor(&self, catch_all: StatId) -> bool {
        matches!(
            self.tree.get(catch_all).map(|stat| &stat.kind),
            Some(StatementKind::CatchAll {
                monitor: Some(_),
                ..
            })
        )
    }
}
