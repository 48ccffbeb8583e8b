//! Process-wide randomness with a test-only override.
//!
//! Every piece of key material in this crate (identity seeds, signed
//! prekeys, one-time prekeys, X3DH ephemerals, ratchet rotation keys)
//! is sampled through [`fill`]. By default that reads the OS CSPRNG;
//! tests install a deterministic reader with [`use_deterministic_random`]
//! so protocol vectors reproduce bit-exactly.
//!
//! The holder is the only process-global state in the crate: a single
//! slot guarded by a mutex. The override is honoured only on the thread
//! that installed it — concurrent threads keep reading the OS source, so
//! an active override cannot leak bytes to unrelated work. The guard
//! restores the OS source when dropped.

use std::sync::Mutex;
use std::thread::{self, ThreadId};

use rand::{rngs::OsRng, RngCore};

struct Override {
    reader: Box<dyn RngCore + Send>,
    owner: ThreadId,
}

static SOURCE: Mutex<Option<Override>> = Mutex::new(None);

/// Fill `buf` from the active randomness source.
pub fn fill(buf: &mut [u8]) {
    let mut slot = SOURCE.lock().unwrap_or_else(|e| e.into_inner());
    match slot.as_mut() {
        Some(active) if active.owner == thread::current().id() => active.reader.fill_bytes(buf),
        _ => OsRng.fill_bytes(buf),
    }
}

/// Sample a 32-byte secret (the size of every keypair seed in the suite).
pub fn bytes32() -> [u8; 32] {
    let mut out = [0u8; 32];
    fill(&mut out);
    out
}

/// Replace this thread's randomness source with `reader`.
///
/// Returns a guard; dropping it restores the OS source. Intended for
/// tests that need reproducible key material. The slot is process-wide
/// and single: installing a second override replaces the first, so
/// tests that use one must serialise themselves.
#[must_use]
pub fn use_deterministic_random(reader: Box<dyn RngCore + Send>) -> RestoreHandle {
    let owner = thread::current().id();
    let mut slot = SOURCE.lock().unwrap_or_else(|e| e.into_inner());
    *slot = Some(Override { reader, owner });
    RestoreHandle { owner }
}

/// Restores the OS randomness source on drop.
pub struct RestoreHandle {
    owner: ThreadId,
}

impl Drop for RestoreHandle {
    fn drop(&mut self) {
        let mut slot = SOURCE.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|active| active.owner == self.owner) {
            *slot = None;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use rand::RngCore;

    /// Serialises tests that install a deterministic source — the slot is
    /// process-global, so concurrent overrides would replace each other.
    pub static EXCLUSIVE: Mutex<()> = Mutex::new(());

    /// Counter reader producing the byte stream `i mod 251`, i = 0, 1, …
    pub struct PatternReader {
        next: u64,
    }

    impl PatternReader {
        pub fn new() -> Self {
            Self { next: 0 }
        }
    }

    impl RngCore for PatternReader {
        fn next_u32(&mut self) -> u32 {
            let mut buf = [0u8; 4];
            self.fill_bytes(&mut buf);
            u32::from_le_bytes(buf)
        }

        fn next_u64(&mut self) -> u64 {
            let mut buf = [0u8; 8];
            self.fill_bytes(&mut buf);
            u64::from_le_bytes(buf)
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for b in dest.iter_mut() {
                *b = (self.next % 251) as u8;
                self.next += 1;
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{PatternReader, EXCLUSIVE};
    use super::*;

    #[test]
    fn override_is_read_and_restored() {
        let _exclusive = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());

        {
            let _restore = use_deterministic_random(Box::new(PatternReader::new()));
            let first = bytes32();
            assert_eq!(first[0], 0);
            assert_eq!(first[31], 31);
            let second = bytes32();
            assert_eq!(second[0], 32);
        }

        // Back on the OS source: two samples must differ.
        assert_ne!(bytes32(), bytes32());
    }

    #[test]
    fn override_does_not_affect_other_threads() {
        let _exclusive = EXCLUSIVE.lock().unwrap_or_else(|e| e.into_inner());
        let _restore = use_deterministic_random(Box::new(PatternReader::new()));

        let from_other_thread = std::thread::spawn(bytes32).join().unwrap();
        let pattern: Vec<u8> = (0u8..32).collect();
        assert_ne!(from_other_thread.to_vec(), pattern);

        // This thread still reads the deterministic stream.
        assert_eq!(bytes32()[0], 0);
    }
}
