use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};

#[derive(Debug, Default)]
pub(crate) struct WakerData {
    wake_count: AtomicUsize,
}

impl WakerData {
    pub(crate) fn get_count(&self) -> usize {
        self.wake_count.load(Ordering::Relaxed)
    }
}

impl Wake for WakerData {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.wake_count.fetch_add(1, Ordering::Relaxed);
    }
}

// Mocking where the Waker will increment the counter every time it is woken up.
pub(crate) fn mock_waker() -> (Waker, Arc<WakerData>) {
    let data = Arc::new(WakerData::default());
    (Waker::from(Arc::clone(&data)), data)
}
