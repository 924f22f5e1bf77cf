//! Pipelined tree Allreduce: reduce-up and broadcast-down streamed in
//! chunks through the per-child ring buffers, so reduction, upward I/O and
//! downward I/O all overlap.

use super::exec_loop::LoopExecutor;
use super::{except_fault, sock_fault};
use crate::error::Result;
use crate::topology::Topology;
use crate::transport::link::Link;
use crate::transport::poll::PollSet;
use std::time::Duration;

/// One Allreduce over the spanning tree.
///
/// Three cursors drive the pipeline:
/// - `size_up_reduce`: prefix of `buf` already reduced from all children,
/// - `size_up_out`: prefix already forwarded to the parent,
/// - `size_down_in`: prefix of the final result received from the parent
///   (at the root this simply mirrors `size_up_reduce`).
///
/// The ring buffers are backpressured on `size_up_out`: a child may run at
/// most one ring ahead of what has been pushed upstream, because bytes
/// forwarded upward are also the bytes whose ring slots may be reused.
#[allow(clippy::too_many_arguments)]
pub(super) fn run(
    links: &mut [Link],
    topo: &Topology,
    buf: &mut [u8],
    elem_bytes: usize,
    count: usize,
    reducer: &mut dyn FnMut(&[u8], &mut [u8], usize),
    mut exec: Option<&mut LoopExecutor<'_>>,
    reduce_buffer_bytes: usize,
) -> Result<()> {
    let tree = &topo.tree;
    let total_size = elem_bytes * count;
    if tree.is_empty() || total_size == 0 {
        return Ok(());
    }
    for (pos, &li) in tree.iter().enumerate() {
        if Some(pos) != topo.parent_pos {
            links[li].init_buffer(elem_bytes, count, reduce_buffer_bytes);
        }
        links[li].reset_size();
    }
    let num_children = topo.num_children();
    // without children there is nothing to reduce: the local buffer is the
    // finished upward payload and this worker is a pure relay
    let mut size_up_reduce = if num_children == 0 { total_size } else { 0 };
    let mut size_up_out = 0usize;
    let mut size_down_in = 0usize;

    loop {
        let mut poll = PollSet::new();
        let mut finished = true;
        for (pos, &li) in tree.iter().enumerate() {
            let link = &links[li];
            if Some(pos) == topo.parent_pos {
                if size_down_in != total_size {
                    poll.watch_read(link.raw_fd());
                    poll.watch_except(link.raw_fd());
                    finished = false;
                }
                if size_up_out != total_size && size_up_out < size_up_reduce {
                    poll.watch_write(link.raw_fd());
                }
            } else {
                if link.size_read != total_size {
                    poll.watch_read(link.raw_fd());
                }
                if link.size_write != total_size {
                    if link.size_write < size_down_in {
                        poll.watch_write(link.raw_fd());
                    }
                    poll.watch_except(link.raw_fd());
                    finished = false;
                }
            }
        }
        if finished {
            return Ok(());
        }

        // with a live executor attached, poll cooperatively so the caller's
        // preprocessing loop advances while the collective stalls on I/O
        let mut timeout = None;
        if let Some(executor) = exec.as_mut() {
            executor.run();
            if !executor.loop_end() {
                timeout = Some(Duration::ZERO);
            }
        }
        poll.wait(timeout)?;

        for &li in tree {
            if poll.check_except(links[li].raw_fd()) {
                return Err(except_fault(links[li].rank));
            }
        }

        // pull child payloads into their ring buffers
        for (pos, &li) in tree.iter().enumerate() {
            if Some(pos) != topo.parent_pos && poll.check_read(links[li].raw_fd()) {
                let rank = links[li].rank;
                links[li]
                    .read_to_ring_buffer(size_up_out)
                    .map_err(|_| sock_fault(rank))?;
            }
        }

        if num_children > 0 {
            // reduce what every child has delivered, one contiguous ring
            // segment at a time (at most two rounds per wake)
            let mut max_reduce = total_size;
            let mut buffer_size = 0;
            for (pos, &li) in tree.iter().enumerate() {
                if Some(pos) != topo.parent_pos {
                    max_reduce = max_reduce.min(links[li].size_read);
                    debug_assert!(buffer_size == 0 || buffer_size == links[li].buffer_size());
                    buffer_size = links[li].buffer_size();
                }
            }
            max_reduce = max_reduce / elem_bytes * elem_bytes;
            while size_up_reduce < max_reduce {
                let start = size_up_reduce % buffer_size;
                let nread = (buffer_size - start).min(max_reduce - size_up_reduce);
                debug_assert_eq!(nread % elem_bytes, 0);
                for (pos, &li) in tree.iter().enumerate() {
                    if Some(pos) != topo.parent_pos {
                        reducer(
                            links[li].ring_slice(start, nread),
                            &mut buf[size_up_reduce..size_up_reduce + nread],
                            nread / elem_bytes,
                        );
                    }
                }
                size_up_reduce += nread;
            }
        }

        if let Some(parent_pos) = topo.parent_pos {
            let pli = tree[parent_pos];
            let parent_rank = links[pli].rank;
            // pass up whatever has been reduced since the last send
            if size_up_out < size_up_reduce {
                let sent = links[pli]
                    .send(&buf[size_up_out..size_up_reduce])
                    .map_err(|_| sock_fault(parent_rank))?;
                size_up_out += sent;
            }
            // pull the final result down from the parent
            if poll.check_read(links[pli].raw_fd()) && size_down_in < total_size {
                let got = links[pli]
                    .recv(&mut buf[size_down_in..total_size])
                    .map_err(|_| sock_fault(parent_rank))?;
                size_down_in += got;
                debug_assert!(size_down_in <= size_up_out);
            }
        } else {
            // at the root the reduced prefix is already the broadcast payload
            size_down_in = size_up_reduce;
            size_up_out = size_up_reduce;
        }

        // fan the finished prefix down to the children
        for (pos, &li) in tree.iter().enumerate() {
            if Some(pos) != topo.parent_pos && links[li].size_write < size_down_in {
                let rank = links[li].rank;
                links[li]
                    .write_from_array(buf, size_down_in)
                    .map_err(|_| sock_fault(rank))?;
            }
        }

        #[cfg(debug_assertions)]
        {
            debug_assert!(size_up_out <= size_up_reduce && size_up_reduce <= total_size);
            debug_assert_eq!(size_up_reduce % elem_bytes, 0);
            if topo.parent_pos.is_some() {
                debug_assert!(size_down_in <= size_up_out);
            } else {
                debug_assert_eq!(size_down_in, size_up_reduce);
                debug_assert_eq!(size_up_out, size_up_reduce);
            }
            for (pos, &li) in tree.iter().enumerate() {
                if Some(pos) != topo.parent_pos {
                    debug_assert!(links[li].size_read - size_up_out <= links[li].buffer_size());
                    debug_assert!(links[li].size_write <= size_down_in);
                }
            }
        }
    }
}
