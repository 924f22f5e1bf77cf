//! The coordinator handshake: bootstrap ("start") and rebuild ("recover").

use super::Engine;
use crate::error::{ArborError, Result};
use crate::topology::Topology;
use crate::tracker::decode_rank;
use crate::transport::link::Link;
use crate::transport::socket;
use crate::types::Rank;
use std::net::{TcpListener, TcpStream};

impl Engine {
    /// Negotiate the peer mesh with the coordinator and derive the tree and
    /// ring topology from it. Used both at startup (`cmd = "start"`) and to
    /// replace dead links after a fault (`cmd = "recover"`).
    pub(crate) fn reconnect_links(&mut self, cmd: &str) -> Result<()> {
        if self.config.tracker_uri == "NULL" {
            self.rank = Some(0);
            self.world_size = Some(1);
            return Ok(());
        }
        self.prune_dead_links();

        let mut tracker = self.connect_tracker()?;
        tracker.send_str(cmd)?;

        let new_rank = decode_rank(tracker.recv_i32()?)
            .ok_or_else(|| ArborError::Handshake("coordinator assigned no rank".into()))?;
        let parent_rank = decode_rank(tracker.recv_i32()?);
        let world_size = tracker.recv_i32()?;
        if let Some(rank) = self.rank {
            if rank != new_rank {
                return Err(ArborError::Handshake(format!(
                    "coordinator moved this worker from rank {rank} to {new_rank}"
                )));
            }
        }
        self.rank = Some(new_rank);
        self.world_size = Some(world_size as u32);

        let num_neighbors = tracker.recv_i32()?;
        let mut tree_neighbors = Vec::with_capacity(num_neighbors.max(0) as usize);
        for _ in 0..num_neighbors {
            if let Some(rank) = decode_rank(tracker.recv_i32()?) {
                tree_neighbors.push(rank);
            }
        }
        let ring_prev = decode_rank(tracker.recv_i32()?);
        let ring_next = decode_rank(tracker.recv_i32()?);

        let (listener, port) = bind_in_range(self.config.slave_port, self.config.nport_trial)?;

        // Peer-exchange rounds: report live links, dial the peers the
        // coordinator pairs us with, and repeat until no dial failed
        // (the coordinator recomputes pairings on failures).
        let mut num_accept;
        loop {
            tracker.send_i32(self.links.len() as i32)?;
            for link in &self.links {
                tracker.send_i32(link.rank as i32)?;
            }
            let num_conn = tracker.recv_i32()?;
            num_accept = tracker.recv_i32()?;
            tracing::debug!(cmd, num_conn, num_accept, "peer exchange round");
            let mut num_error = 0;
            for _ in 0..num_conn {
                let host = tracker.recv_str()?;
                let peer_port = tracker.recv_i32()? as u16;
                let peer_rank = tracker.recv_i32()? as Rank;
                match TcpStream::connect((host.as_str(), peer_port)) {
                    Ok(mut sock) => {
                        let got = socket::exchange_ranks(&mut sock, new_rank)?;
                        if got != peer_rank {
                            return Err(ArborError::RankMismatch {
                                expected: peer_rank,
                                got,
                            });
                        }
                        self.install_link(Link::new(peer_rank, sock))?;
                    }
                    Err(e) => {
                        tracing::warn!(peer_rank, error = %e, "peer dial failed");
                        num_error += 1;
                    }
                }
            }
            tracker.send_i32(num_error)?;
            if num_error == 0 {
                break;
            }
        }
        tracker.send_i32(port as i32)?;
        drop(tracker);

        for _ in 0..num_accept {
            let (mut sock, _) = listener.accept()?;
            let peer_rank = socket::exchange_ranks(&mut sock, new_rank)?;
            self.install_link(Link::new(peer_rank, sock))?;
        }
        drop(listener);

        for link in &self.links {
            socket::prepare_peer(&link.sock)?;
        }
        self.topo = derive_topology(&self.links, &tree_neighbors, parent_rank, ring_prev, ring_next)?;
        self.err_link = None;
        Ok(())
    }

    fn install_link(&mut self, link: Link) -> Result<()> {
        // dead entries were pruned before the exchange, so a rank collision
        // means the coordinator paired us against a live link
        if self.links.iter().any(|l| l.rank == link.rank) {
            return Err(ArborError::LinkOverride(link.rank));
        }
        self.links.push(link);
        Ok(())
    }

    /// Drop links that are known dead: the one the last collective faulted
    /// on, anything with a pending socket error, and peers that performed
    /// an orderly shutdown (zero-length peek).
    fn prune_dead_links(&mut self) {
        let err_link = self.err_link.take();
        self.links.retain(|link| {
            if Some(link.rank) == err_link {
                return false;
            }
            if !matches!(link.sock.take_error(), Ok(None)) {
                return false;
            }
            let mut probe = [0u8; 1];
            match (&link.sock).peek(&mut probe) {
                Ok(0) => false,
                Ok(_) => true,
                Err(e) => socket::is_transient(e.kind()),
            }
        });
    }
}

fn bind_in_range(slave_port: u16, nport_trial: u16) -> Result<(TcpListener, u16)> {
    for trial in 0..nport_trial {
        let Some(port) = slave_port.checked_add(trial) else {
            break;
        };
        if let Ok(listener) = TcpListener::bind(("0.0.0.0", port)) {
            return Ok((listener, port));
        }
    }
    Err(ArborError::PortExhausted {
        lo: slave_port,
        hi: slave_port.saturating_add(nport_trial),
    })
}

fn derive_topology(
    links: &[Link],
    tree_neighbors: &[Rank],
    parent_rank: Option<Rank>,
    ring_prev: Option<Rank>,
    ring_next: Option<Rank>,
) -> Result<Topology> {
    let mut topo = Topology {
        parent_rank,
        ..Topology::default()
    };
    for (idx, link) in links.iter().enumerate() {
        if tree_neighbors.contains(&link.rank) {
            if Some(link.rank) == parent_rank {
                topo.parent_pos = Some(topo.tree.len());
            }
            topo.tree.push(idx);
        }
        if Some(link.rank) == ring_prev {
            topo.ring_prev = Some(idx);
        }
        if Some(link.rank) == ring_next {
            topo.ring_next = Some(idx);
        }
    }
    if parent_rank.is_some() && topo.parent_pos.is_none() {
        return Err(ArborError::Handshake("no link to the announced parent".into()));
    }
    if ring_prev.is_some() && topo.ring_prev.is_none() {
        return Err(ArborError::Handshake("no link to the ring predecessor".into()));
    }
    if ring_next.is_some() && topo.ring_next.is_none() {
        return Err(ArborError::Handshake("no link to the ring successor".into()));
    }
    Ok(topo)
}
