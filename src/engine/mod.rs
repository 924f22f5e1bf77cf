//! The collective engine: link set, topology, and the public operations.

mod allreduce;
mod bootstrap;
mod broadcast;
mod exec_loop;

pub use exec_loop::LoopExecutor;

use crate::config::ArborConfig;
use crate::error::{ArborError, FaultKind, LinkFault, Result};
use crate::reduce::{reduce_slice, Reducible};
use crate::topology::Topology;
use crate::tracker::TrackerConn;
use crate::transport::link::Link;
use crate::types::{Rank, ReduceOp};

/// One worker's half of the cohort: the peer mesh, the spanning-tree and
/// ring neighborhood, and the collective state machines.
///
/// An engine is process-scoped in spirit (one cohort per process) but is an
/// explicit value: construct it with [`init`](Self::init), run collectives,
/// and release the cohort with [`shutdown`](Self::shutdown).
pub struct Engine {
    config: ArborConfig,
    rank: Option<Rank>,
    world_size: Option<u32>,
    version_number: u64,
    links: Vec<Link>,
    topo: Topology,
    /// Rank of the link the last collective faulted on; the next rebuild
    /// closes and replaces it.
    err_link: Option<Rank>,
}

impl Engine {
    /// Connect to the coordinator and bring up the peer mesh.
    ///
    /// With `tracker_uri == "NULL"` no sockets are opened: the worker
    /// becomes rank 0 of a cohort of one and every collective is local.
    pub fn init(mut config: ArborConfig) -> Result<Engine> {
        config.apply_env()?;
        let world_size = config.world_size;
        let mut engine = Engine {
            config,
            rank: None,
            world_size,
            version_number: 0,
            links: Vec::new(),
            topo: Topology::default(),
            err_link: None,
        };
        engine.reconnect_links("start")?;
        tracing::info!(
            rank = engine.rank(),
            world_size = engine.world_size(),
            links = engine.links.len(),
            "engine initialized"
        );
        Ok(engine)
    }

    /// This worker's rank, assigned by the coordinator.
    pub fn rank(&self) -> Rank {
        self.rank.unwrap_or(0)
    }

    /// Cohort size, fixed for the lifetime of the session.
    pub fn world_size(&self) -> u32 {
        self.world_size.unwrap_or(1)
    }

    /// Number of collectives this worker has completed. A successful
    /// collective K guarantees every worker completed collective K-1, so
    /// the recovery layer can reason about cohort progress from this.
    pub fn version_number(&self) -> u64 {
        self.version_number
    }

    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    /// Rebuild the peer mesh after a collective fault: contacts the
    /// coordinator in recover mode, closes stale links and installs
    /// replacements. The aborted collective can then be retried.
    pub fn recover(&mut self) -> Result<()> {
        self.reconnect_links("recover")
    }

    /// Close every link, drop the topology and notify the coordinator.
    pub fn shutdown(mut self) -> Result<()> {
        self.links.clear();
        self.topo.clear();
        if self.config.tracker_uri == "NULL" {
            return Ok(());
        }
        let mut tracker = self.connect_tracker()?;
        tracker.send_str("shutdown")?;
        Ok(())
    }

    /// Route a message through the coordinator's log; falls back to local
    /// stdout in single-node mode.
    pub fn tracker_print(&self, msg: &str) -> Result<()> {
        if self.config.tracker_uri == "NULL" {
            println!("{msg}");
            return Ok(());
        }
        let mut tracker = self.connect_tracker()?;
        tracker.send_str("print")?;
        tracker.send_str(msg)?;
        Ok(())
    }

    pub(crate) fn connect_tracker(&self) -> Result<TrackerConn> {
        TrackerConn::connect(
            &self.config.tracker_uri,
            self.config.tracker_port,
            self.rank,
            self.world_size,
            &self.config.task_id,
        )
    }

    /// In-place Allreduce over raw bytes: `count` elements of `elem_bytes`
    /// each, combined with `reducer(src, dst, nelem)` where
    /// `dst[i] = reduce(dst[i], src[i])`. The reducer must be associative
    /// and commutative for a deterministic result.
    ///
    /// On success the buffer holds the full reduction across all workers.
    /// A fault abandons the collective and reports the faulted link via
    /// [`ArborError::Fault`]; the link stays open until [`recover`](Self::recover).
    ///
    /// When `exec` is attached and its loop has not ended, the selector
    /// polls cooperatively so preprocessing advances during communication
    /// stalls.
    pub fn try_allreduce<F>(
        &mut self,
        buf: &mut [u8],
        elem_bytes: usize,
        count: usize,
        mut reducer: F,
        exec: Option<&mut LoopExecutor<'_>>,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &mut [u8], usize),
    {
        if buf.len() != elem_bytes * count {
            return Err(ArborError::BufferSizeMismatch {
                expected: elem_bytes * count,
                actual: buf.len(),
            });
        }
        let res = allreduce::run(
            &mut self.links,
            &self.topo,
            buf,
            elem_bytes,
            count,
            &mut reducer,
            exec,
            self.config.reduce_buffer_bytes,
        );
        self.finish_collective(res)
    }

    /// Propagate `buf` from `root` to every worker. On return every
    /// reachable worker holds the root's bytes.
    pub fn try_broadcast(&mut self, buf: &mut [u8], root: Rank) -> Result<()> {
        let world_size = self.world_size();
        if root >= world_size {
            return Err(ArborError::InvalidRoot { root, world_size });
        }
        let is_root = self.rank() == root;
        let res = broadcast::run(&mut self.links, &self.topo, buf, is_root);
        self.finish_collective(res)
    }

    /// Typed in-place Allreduce with a built-in operation, retried across
    /// link faults: on a fault the mesh is rebuilt in recover mode, the
    /// caller's contribution is restored from a snapshot (a fault can leave
    /// the buffer partially combined) and the collective re-runs. Use
    /// [`try_allreduce`](Self::try_allreduce) to drive recovery yourself.
    pub fn allreduce<T: Reducible>(&mut self, buf: &mut [T], op: ReduceOp) -> Result<()> {
        let nbytes = std::mem::size_of_val(buf);
        let bytes = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<u8>(), nbytes) };
        let elem_bytes = T::DTYPE.size_in_bytes();
        let count = bytes.len() / elem_bytes;
        let saved = bytes.to_vec();
        loop {
            let res = self.try_allreduce(
                bytes,
                elem_bytes,
                count,
                |src, dst, nelem| reduce_slice(dst, src, nelem, T::DTYPE, op),
                None,
            );
            match res {
                Ok(()) => return Ok(()),
                Err(ArborError::Fault(_)) => {
                    self.recover()?;
                    bytes.copy_from_slice(&saved);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Broadcast retried across link faults; see [`allreduce`](Self::allreduce)
    /// for the recovery contract. No snapshot is needed: the root never
    /// reads its buffer and receivers are fully overwritten.
    pub fn broadcast(&mut self, buf: &mut [u8], root: Rank) -> Result<()> {
        loop {
            match self.try_broadcast(buf, root) {
                Ok(()) => return Ok(()),
                Err(ArborError::Fault(_)) => self.recover()?,
                Err(e) => return Err(e),
            }
        }
    }

    fn finish_collective(&mut self, res: Result<()>) -> Result<()> {
        match res {
            Ok(()) => {
                self.version_number += 1;
                Ok(())
            }
            Err(ArborError::Fault(fault)) => {
                self.err_link = Some(fault.rank);
                tracing::warn!(rank = fault.rank, kind = ?fault.kind, "collective aborted");
                Err(ArborError::Fault(fault))
            }
            Err(e) => Err(e),
        }
    }
}

pub(crate) fn sock_fault(rank: Rank) -> ArborError {
    ArborError::Fault(LinkFault {
        rank,
        kind: FaultKind::SockError,
    })
}

pub(crate) fn except_fault(rank: Rank) -> ArborError {
    ArborError::Fault(LinkFault {
        rank,
        kind: FaultKind::GetExcept,
    })
}
