use parking_lot::Mutex;
use podpipe_protocol::RequestId;

/// Hands out port-forward request ids, starting at 1
///
/// Each engine owns its own allocator, so independent engines never share
/// a sequence.
#[derive(Debug, Default)]
pub struct RequestIdAllocator {
    counter: Mutex<u64>,
}

impl RequestIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> RequestId {
        let mut counter = self.counter.lock();
        *counter += 1;
        RequestId::new(*counter)
    }
}
