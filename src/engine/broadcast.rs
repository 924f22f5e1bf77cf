//! Tree broadcast: one input link (the side containing the root), fan-out
//! on every other link.

use super::{except_fault, sock_fault};
use crate::error::Result;
use crate::topology::Topology;
use crate::transport::link::Link;
use crate::transport::poll::PollSet;

/// Where this worker's copy of the payload arrives from.
#[derive(Clone, Copy, PartialEq, Eq)]
enum InLink {
    /// Not yet known: probe every link until one delivers bytes.
    Undecided,
    /// This worker is the root; the buffer is already full.
    Local,
    /// Tree position of the link the payload streams in on.
    Tree(usize),
}

pub(super) fn run(links: &mut [Link], topo: &Topology, buf: &mut [u8], is_root: bool) -> Result<()> {
    let tree = &topo.tree;
    let total_size = buf.len();
    if tree.is_empty() || total_size == 0 {
        return Ok(());
    }
    for &li in tree {
        links[li].reset_size();
    }
    let (mut in_link, mut size_in) = if is_root {
        (InLink::Local, total_size)
    } else {
        (InLink::Undecided, 0)
    };

    loop {
        let mut poll = PollSet::new();
        let mut finished = true;
        for (pos, &li) in tree.iter().enumerate() {
            let link = &links[li];
            if in_link == InLink::Undecided {
                poll.watch_read(link.raw_fd());
                finished = false;
            }
            if in_link == InLink::Tree(pos) && link.size_read != total_size {
                poll.watch_read(link.raw_fd());
                finished = false;
            }
            if in_link != InLink::Undecided
                && in_link != InLink::Tree(pos)
                && link.size_write != total_size
            {
                if link.size_write < size_in {
                    poll.watch_write(link.raw_fd());
                }
                finished = false;
            }
            poll.watch_except(link.raw_fd());
        }
        if finished {
            return Ok(());
        }
        poll.wait(None)?;

        for &li in tree {
            if poll.check_except(links[li].raw_fd()) {
                return Err(except_fault(links[li].rank));
            }
        }

        if in_link == InLink::Undecided {
            // probe: the first link that delivers bytes is the input side
            for (pos, &li) in tree.iter().enumerate() {
                if poll.check_read(links[li].raw_fd()) {
                    let rank = links[li].rank;
                    links[li]
                        .read_to_array(buf, total_size)
                        .map_err(|_| sock_fault(rank))?;
                    size_in = links[li].size_read;
                    if size_in != 0 {
                        in_link = InLink::Tree(pos);
                        break;
                    }
                }
            }
        } else if let InLink::Tree(pos) = in_link {
            let li = tree[pos];
            if poll.check_read(links[li].raw_fd()) {
                let rank = links[li].rank;
                links[li]
                    .read_to_array(buf, total_size)
                    .map_err(|_| sock_fault(rank))?;
                size_in = links[li].size_read;
            }
        }

        // relay the received prefix on every out-link
        for (pos, &li) in tree.iter().enumerate() {
            if in_link != InLink::Tree(pos) && links[li].size_write < size_in {
                let rank = links[li].rank;
                links[li]
                    .write_from_array(buf, size_in)
                    .map_err(|_| sock_fault(rank))?;
            }
        }
    }
}
