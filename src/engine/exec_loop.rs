//! The approximation loop driver: interleaves a caller-supplied
//! preprocessing loop with periodic status Allreduces and stops early once
//! a sufficient fraction of the global work is done.

use super::Engine;
use crate::error::Result;
use crate::reduce::LeBytes;

/// A caller's preprocessing loop, packaged for cooperative execution.
///
/// The closure receives half-open iteration ranges `[begin, end)`; the
/// executor tracks progress and the step quantum run between selector polls
/// while a collective is in flight.
pub struct LoopExecutor<'a> {
    prepare_loop: Box<dyn FnMut(usize, usize) + 'a>,
    num_loop_iter: usize,
    loop_counter: usize,
    loop_step: usize,
}

impl<'a> LoopExecutor<'a> {
    pub fn new(
        prepare_loop: impl FnMut(usize, usize) + 'a,
        num_loop_iter: usize,
        loop_step: usize,
    ) -> Self {
        Self {
            prepare_loop: Box::new(prepare_loop),
            num_loop_iter,
            loop_counter: 0,
            loop_step: loop_step.max(1),
        }
    }

    /// Advance one quantum of preprocessing.
    pub fn run(&mut self) {
        self.run_steps(self.loop_step);
    }

    /// Advance up to `n` iterations, clamped to the end of the loop.
    pub fn run_steps(&mut self, n: usize) {
        let end = self.loop_counter.saturating_add(n).min(self.num_loop_iter);
        if end > self.loop_counter {
            (self.prepare_loop)(self.loop_counter, end);
            self.loop_counter = end;
        }
    }

    /// Whether the whole local loop has run.
    pub fn loop_end(&self) -> bool {
        self.loop_counter >= self.num_loop_iter
    }

    /// Iterations completed so far.
    pub fn loop_counter(&self) -> usize {
        self.loop_counter
    }
}

/// Cohort-wide progress summary carried by the status Allreduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoopStatus {
    /// Remaining iterations, summed across workers.
    num_left: u64,
    /// Maximum remaining iterations on any worker.
    max_left: u64,
    /// Number of workers that have completed.
    num_finish: u64,
}

impl LoopStatus {
    const BYTES: usize = 24;

    fn new(num_left: u64) -> Self {
        Self {
            num_left,
            max_left: num_left,
            num_finish: (num_left == 0) as u64,
        }
    }

    fn to_bytes(self) -> [u8; Self::BYTES] {
        let mut raw = [0u8; Self::BYTES];
        self.num_left.write_le(&mut raw[0..8]);
        self.max_left.write_le(&mut raw[8..16]);
        self.num_finish.write_le(&mut raw[16..24]);
        raw
    }

    fn from_bytes(raw: &[u8]) -> Self {
        Self {
            num_left: u64::read_le(&raw[0..8]),
            max_left: u64::read_le(&raw[8..16]),
            num_finish: u64::read_le(&raw[16..24]),
        }
    }

    /// Status reducer: sum the remainders, max the stragglers, count the
    /// finishers.
    fn reduce(src: &[u8], dst: &mut [u8], _nelem: usize) {
        let a = LoopStatus::from_bytes(src);
        let mut b = LoopStatus::from_bytes(dst);
        b.num_left += a.num_left;
        b.max_left = b.max_left.max(a.max_left);
        b.num_finish += a.num_finish;
        dst.copy_from_slice(&b.to_bytes());
    }
}

impl Engine {
    /// Run `prepare_loop` until the cohort has completed at least
    /// `approx_ratio` of the globally-enumerated iterations and a majority
    /// of workers have finished, then stop. Returns the achieved ratio.
    ///
    /// While a status Allreduce is in flight the executor stays attached,
    /// so this very loop keeps advancing through communication stalls.
    pub fn try_exec_loop(
        &mut self,
        prepare_loop: impl FnMut(usize, usize),
        num_loop_iter: usize,
        approx_ratio: f64,
    ) -> Result<f64> {
        let world_size = self.world_size() as f64;

        let mut total_raw = (num_loop_iter as u64).to_le_bytes();
        self.try_allreduce(
            &mut total_raw,
            8,
            1,
            |src, dst, _| {
                let sum = u64::read_le(dst) + u64::read_le(src);
                sum.write_le(dst);
            },
            None,
        )?;
        let num_total = u64::from_le_bytes(total_raw);

        let approx_gap = num_total - (approx_ratio * num_total as f64) as u64;
        let loop_step = ((num_total as f64 * self.config.approx_run_step / world_size) as usize).max(1);
        let mut exec = LoopExecutor::new(prepare_loop, num_loop_iter, loop_step);
        if approx_gap == 0 {
            exec.run_steps(num_loop_iter);
            return Ok(1.0);
        }

        let mut num_left = num_total;
        while num_left != 0 {
            let step = ((num_left as f64 * self.config.approx_check_step / world_size) as usize)
                .max((num_total as f64 * self.config.approx_check_min_step / world_size) as usize)
                .max(loop_step);
            exec.run_steps(step);
            let local = LoopStatus::new((num_loop_iter - exec.loop_counter()) as u64);
            let mut raw = local.to_bytes();
            // run the probe cooperatively: the executor keeps working while
            // the status collective is in flight
            self.try_allreduce(&mut raw, LoopStatus::BYTES, 1, LoopStatus::reduce, Some(&mut exec))?;
            let status = LoopStatus::from_bytes(&raw);
            num_left = status.num_left;
            if num_left < approx_gap && status.num_finish as f64 > world_size * 0.5 {
                break;
            }
        }
        if num_left != 0 {
            // one detached, blocking probe so all workers agree on the
            // final remainder
            let local = LoopStatus::new((num_loop_iter - exec.loop_counter()) as u64);
            let mut raw = local.to_bytes();
            self.try_allreduce(&mut raw, LoopStatus::BYTES, 1, LoopStatus::reduce, None)?;
            num_left = LoopStatus::from_bytes(&raw).num_left;
        }
        Ok((num_total - num_left) as f64 / num_total as f64)
    }
}
