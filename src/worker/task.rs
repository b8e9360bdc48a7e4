use crate::error::{Result, WorkerError};

/// Bounded, deterministic unit of work run inside an execution slot.
///
/// Implementations run on a blocking thread and may take seconds of CPU.
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn run(&self, payload: i64) -> Result<u64>;
}

/// Largest `n` whose Fibonacci number fits in a `u64`.
pub const MAX_FIBONACCI_INPUT: i64 = 93;

/// Recursive Fibonacci; exponential in `n`, which is the point.
pub fn fibonacci(n: u64) -> u64 {
    if n <= 1 {
        return n;
    }
    fibonacci(n - 1) + fibonacci(n - 2)
}

/// CPU-heavy task that rejects payloads outside `0..=max_payload`.
#[derive(Debug, Clone)]
pub struct FibonacciTask {
    max_payload: i64,
}

impl FibonacciTask {
    pub fn new(max_payload: i64) -> Self {
        Self { max_payload }
    }
}

impl Task for FibonacciTask {
    fn name(&self) -> &'static str {
        "fibonacci"
    }

    fn run(&self, payload: i64) -> Result<u64> {
        let max = self.max_payload.min(MAX_FIBONACCI_INPUT);
        if !(0..=max).contains(&payload) {
            return Err(WorkerError::InvalidPayload { payload, max });
        }
        Ok(fibonacci(payload as u64))
    }
}
