use std::mem;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    buffer::WindowBuffer,
    error::{Result, SwapError},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Filling,
    Processing,
}

/// Outcome of waiting for the next hand-off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapSignal {
    /// A window is ready to drain; carries its generation.
    Window(u64),
    /// The stream finished and every window has been drained.
    Finished,
}

struct SwapState<T> {
    active: WindowBuffer<T>,
    draining: WindowBuffer<T>,
    phase: Phase,
    generation: u64,
    finished: bool,
    done: bool,
}

impl<T> SwapState<T> {
    /// Exchange buffer roles. Caller holds the lock.
    fn swap(&mut self) {
        mem::swap(&mut self.active, &mut self.draining);
        self.generation += 1;
        self.phase = Phase::Processing;
    }
}

/// Owns the two window buffers and the fill/drain state machine.
///
/// All shared state lives behind one mutex; the hand-off signal is a watch
/// channel bumped under that lock, so a waiter that re-checks the state
/// after every `changed()` can never miss a wakeup.
pub struct SwapController<T> {
    window_size: usize,
    state: Mutex<SwapState<T>>,
    signal: watch::Sender<u64>,
}

impl<T> SwapController<T> {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        let (signal, _) = watch::channel(0);
        Self {
            window_size,
            state: Mutex::new(SwapState {
                active: WindowBuffer::with_capacity(window_size),
                draining: WindowBuffer::with_capacity(window_size),
                phase: Phase::Filling,
                generation: 0,
                finished: false,
                done: false,
            }),
            signal,
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Append one item to the active buffer.
    pub fn append(&self, item: T) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(SwapError::Closed);
        }
        state.active.push(item);
        Ok(())
    }

    /// Swap if the active buffer has reached the window threshold.
    ///
    /// A no-op while a drain is in flight: the active buffer keeps growing
    /// past `window_size` instead of dropping items, and the swap happens
    /// on a later append once the drain is released.
    pub fn try_threshold_swap(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Filling || state.done {
            return false;
        }
        if state.active.len() < self.window_size {
            return false;
        }
        state.swap();
        self.notify();
        true
    }

    /// Swap regardless of the threshold, flushing a partial window.
    ///
    /// Returns false without swapping when the active buffer is empty; if
    /// the finish flag is set this marks the pipeline done instead. Also a
    /// no-op while a drain is in flight — `release_drained` performs the
    /// deferred swap in that case.
    pub fn force_swap(&self) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Filling || state.done {
            return false;
        }
        if state.active.is_empty() {
            if state.finished {
                state.done = true;
                self.notify();
            }
            return false;
        }
        state.swap();
        self.notify();
        true
    }

    /// Set the finish flag. Idempotent; later appends fail with `Closed`.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.notify();
    }

    /// Suspend until a window is ready to drain or the pipeline is done.
    ///
    /// The single suspension point for the processing path. Callers
    /// compose cancellation with `tokio::select!`.
    pub async fn wait_for_swap(&self) -> SwapSignal {
        let mut rx = self.signal.subscribe();
        loop {
            {
                let state = self.state.lock();
                if state.phase == Phase::Processing {
                    return SwapSignal::Window(state.generation);
                }
                if state.done {
                    return SwapSignal::Finished;
                }
            }
            if rx.changed().await.is_err() {
                return SwapSignal::Finished;
            }
        }
    }

    /// Move the drained window's contents out for processing. O(1).
    pub fn take_draining(&self, generation: u64) -> Result<Vec<T>> {
        let mut state = self.state.lock();
        if state.phase != Phase::Processing || state.generation != generation {
            return Err(SwapError::StaleGeneration {
                current: state.generation,
                requested: generation,
            });
        }
        Ok(state.draining.take())
    }

    /// Report a drained window as fully processed and return to filling.
    ///
    /// `recycled` is the vector handed out by `take_draining`; it is
    /// cleared and restored so its capacity is reused. If the finish flag
    /// is set and items remain in the active buffer, the forced final swap
    /// happens here (covering an end-of-stream that arrived while this
    /// drain was in flight); if nothing remains, the pipeline is done.
    pub fn release_drained(&self, generation: u64, recycled: Vec<T>) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase != Phase::Processing || state.generation != generation {
            return Err(SwapError::StaleGeneration {
                current: state.generation,
                requested: generation,
            });
        }
        state.draining.recycle(recycled);
        state.phase = Phase::Filling;
        if state.finished {
            if state.active.is_empty() {
                state.done = true;
            } else {
                state.swap();
            }
        }
        self.notify();
        Ok(())
    }

    /// Collect everything not yet handed to the sink and mark the
    /// controller done. Shutdown-only: valid once both loops have stopped;
    /// drained-but-unreleased contents come first, then the active buffer.
    pub fn take_residual(&self) -> Vec<T> {
        let mut state = self.state.lock();
        let mut residual = state.draining.take();
        residual.append(&mut state.active.take());
        state.done = true;
        state.phase = Phase::Filling;
        self.notify();
        residual
    }

    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    fn notify(&self) {
        self.signal.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }
}
