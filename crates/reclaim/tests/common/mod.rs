//! Shared fixtures for the reclaim integration tests
//!
//! Every helper asserts strictly; a fixture that silently degrades would
//! hide the bugs these tests exist to find.

#![allow(dead_code)]

use reclaim::object::{FieldOffset, Payload, ReferenceMap};
use reclaim::swap::{MemoryBackend, SwapBackend};
use reclaim::table::{EntryHandle, HandshakePhase, HandshakeProbe};
use reclaim::{ObjectAddress, ReclaimError, Result, SwapConfig, SwapRuntime};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// Table size used by most tests
pub const TEST_TABLE_ENTRIES: usize = 64;

/// Upper bound on any blocking wait in the harnesses
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Class id given to every test object
pub const TEST_CLASS: u32 = 7;

// ============================================================================
// SWAP FIXTURE
// ============================================================================

/// Started runtime with a small table and heap
pub struct SwapFixture {
    pub runtime: SwapRuntime,
    pub config: SwapConfig,
}

impl SwapFixture {
    /// **Bug this finds:** runtime construction or startup failures
    pub fn new() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Arc<dyn SwapBackend>) -> Self {
        Self::with_config_and_backend(test_config(), backend)
    }

    pub fn with_config(config: SwapConfig) -> Self {
        Self::with_config_and_backend(config, Arc::new(MemoryBackend::new()))
    }

    pub fn with_config_and_backend(config: SwapConfig, backend: Arc<dyn SwapBackend>) -> Self {
        let runtime = SwapRuntime::with_backend(config.clone(), backend)
            .expect("runtime should build from a valid config");
        runtime.start().expect("runtime should start");
        Self { runtime, config }
    }

    /// Object with `words` 8-byte fields, word `i` holding `seed + i`
    pub fn object_with_words(&self, words: u32, seed: i64) -> ObjectAddress {
        let address = self
            .runtime
            .allocate(TEST_CLASS, words as usize * 8, ReferenceMap::empty())
            .expect("allocation should succeed");
        let object = self.runtime.object(address).expect("object just allocated");
        for i in 0..words {
            object
                .set_field_64(self.runtime.context(), FieldOffset::of_word(i), seed + i as i64)
                .expect("in-bounds store");
        }
        address
    }

    /// Object whose words are all references
    pub fn node(&self, words: u32) -> ObjectAddress {
        let map = ReferenceMap::new((0..words).collect());
        self.runtime
            .allocate(TEST_CLASS, words as usize * 8, map)
            .expect("allocation should succeed")
    }

    pub fn link(&self, from: ObjectAddress, word: u32, to: Option<ObjectAddress>) {
        self.runtime
            .object(from)
            .expect("source object")
            .set_field_object(self.runtime.context(), FieldOffset::of_word(word), to)
            .expect("reference store");
    }

    pub fn read_word(&self, address: ObjectAddress, word: u32) -> Result<i64> {
        self.runtime
            .object(address)?
            .get_field_64(self.runtime.context(), FieldOffset::of_word(word))
    }

    /// Swap out and return the entry, asserting a stub took the object's place
    pub fn swap_out(&self, address: ObjectAddress) -> EntryHandle {
        let handle = self
            .runtime
            .swap_out(address)
            .expect("swap-out should succeed");
        assert_stub(&self.runtime, address);
        handle
    }

    pub fn counter(&self, handle: EntryHandle) -> u8 {
        self.runtime
            .context()
            .table()
            .entry(handle)
            .expect("handle from this table")
            .app_lock_counter()
    }
}

impl Drop for SwapFixture {
    fn drop(&mut self) {
        let _ = self.runtime.stop();
    }
}

pub fn test_config() -> SwapConfig {
    SwapConfig {
        table_entries: TEST_TABLE_ENTRIES,
        large_object_threshold: 4096,
        main_space_bytes: 1 << 20,
        large_space_bytes: 4 << 20,
        ..Default::default()
    }
}

pub fn assert_stub(runtime: &SwapRuntime, address: ObjectAddress) {
    let object = runtime.object(address).expect("object should exist");
    assert!(object.is_stub(), "{} should be a stub", address);
    assert!(object.header().is_stub());
}

pub fn assert_direct(runtime: &SwapRuntime, address: ObjectAddress) {
    let object = runtime.object(address).expect("object should exist");
    assert!(!object.is_stub(), "{} should not be a stub", address);
}

// ============================================================================
// FAILING BACKEND
// ============================================================================

/// Memory backend with switchable read and write failures
#[derive(Default)]
pub struct FailingBackend {
    inner: MemoryBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    discards: AtomicUsize,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

impl SwapBackend for FailingBackend {
    fn write_out(&self, entry: EntryHandle, payload: &Payload) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ReclaimError::Storage("injected write failure".to_string()));
        }
        self.inner.write_out(entry, payload)
    }

    fn read_in(&self, entry: EntryHandle) -> Result<Payload> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(ReclaimError::Storage("injected read failure".to_string()));
        }
        self.inner.read_in(entry)
    }

    fn discard(&self, entry: EntryHandle) {
        self.discards.fetch_add(1, Ordering::SeqCst);
        self.inner.discard(entry);
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ============================================================================
// SCRIPTED HANDSHAKE PROBE
// ============================================================================

/// One observable step of an app thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Poll {
        thread: usize,
        phase: HandshakePhase,
        kernel_locked: bool,
    },
    Increment {
        thread: usize,
        phase: HandshakePhase,
        counter: u8,
    },
    /// Handshake returned; carries what the thread's last poll observed
    Locked {
        thread: usize,
        last_poll_locked: Option<bool>,
    },
    Unlocked {
        thread: usize,
        counter: u8,
    },
}

impl Step {
    pub fn thread(&self) -> usize {
        match self {
            Step::Poll { thread, .. }
            | Step::Increment { thread, .. }
            | Step::Locked { thread, .. }
            | Step::Unlocked { thread, .. } => *thread,
        }
    }
}

/// Probe that reports every handshake step and blocks until resumed
pub struct ScriptedProbe {
    thread: usize,
    steps: Sender<Step>,
    resume: Receiver<()>,
    last_poll_locked: Option<bool>,
}

impl ScriptedProbe {
    pub fn new(thread: usize, steps: Sender<Step>, resume: Receiver<()>) -> Self {
        Self {
            thread,
            steps,
            resume,
            last_poll_locked: None,
        }
    }

    pub fn last_poll_locked(&self) -> Option<bool> {
        self.last_poll_locked
    }

    /// Report a step outside the handshake and wait for the go-ahead
    pub fn report(&mut self, step: Step) {
        self.steps.send(step).expect("coordinator alive");
        self.wait();
    }

    pub fn send(&self, step: Step) {
        self.steps.send(step).expect("coordinator alive");
    }

    fn wait(&mut self) {
        self.resume
            .recv_timeout(TEST_TIMEOUT)
            .expect("coordinator should resume the thread");
    }
}

impl HandshakeProbe for ScriptedProbe {
    fn on_poll(&mut self, phase: HandshakePhase, kernel_locked: bool) {
        self.last_poll_locked = Some(kernel_locked);
        self.report(Step::Poll {
            thread: self.thread,
            phase,
            kernel_locked,
        });
    }

    fn on_increment(&mut self, phase: HandshakePhase, counter: u8) {
        self.report(Step::Increment {
            thread: self.thread,
            phase,
            counter,
        });
    }
}
