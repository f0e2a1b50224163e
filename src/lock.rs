//! A writer-preferred reader/writer gate.
//!
//! `std::sync::RwLock` makes no preference guarantee between readers
//! and writers; on some platforms a steady stream of readers can starve
//! a waiting writer indefinitely. This engine requires the opposite: a
//! writer that arrives blocks new readers from entering until it has
//! run, so writes cannot be starved by reads.
//!
//! The gate is a `Mutex<State>` plus two `Condvar`s (`read_ready`,
//! `write_ready`), mirroring the classic writer-preference scheduling
//! discipline: once `writers_waiting > 0`, no new reader may proceed
//! until the count drops back to zero.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
struct State {
    active_readers: u32,
    writer_active: bool,
    writers_waiting: u32,
}

pub struct WriterPreferringLock {
    state: Mutex<State>,
    read_ready: Condvar,
    write_ready: Condvar,
}

impl Default for WriterPreferringLock {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterPreferringLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            read_ready: Condvar::new(),
            write_ready: Condvar::new(),
        }
    }

    /// Acquire the read-critical section. Blocks while a writer is
    /// active or waiting.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.writer_active || state.writers_waiting > 0 {
            state = self.read_ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.active_readers += 1;
        drop(state);
        ReadGuard { lock: self }
    }

    /// Acquire the write-critical section. Blocks until no readers or
    /// writer are active; announces itself immediately so arriving
    /// readers queue behind it.
    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.writers_waiting += 1;
        while state.writer_active || state.active_readers > 0 {
            state = self.write_ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.writers_waiting -= 1;
        state.writer_active = true;
        drop(state);
        WriteGuard { lock: self }
    }

    fn release_read(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.active_readers -= 1;
        if state.active_readers == 0 {
            drop(state);
            self.write_ready.notify_one();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.writer_active = false;
        drop(state);
        if self.state.lock().unwrap_or_else(|e| e.into_inner()).writers_waiting > 0 {
            self.write_ready.notify_one();
        } else {
            self.read_ready.notify_all();
        }
    }
}

pub struct ReadGuard<'a> {
    lock: &'a WriterPreferringLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard<'a> {
    lock: &'a WriterPreferringLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
