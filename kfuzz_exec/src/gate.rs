//! Admission gate bounding the number of concurrently running progs.
use std::sync::{Condvar, Mutex};

pub type GateCallback = Box<dyn Fn() + Send + Sync>;

/// Counting gate with an optional exclusive callback.
///
/// The callback runs once every `capacity` released tickets, after all outstanding
/// tickets are gone, and no ticket is admitted while it runs.
pub struct Gate {
    capacity: usize,
    state: Mutex<GateState>,
    cv: Condvar,
    callback: Option<GateCallback>,
}

#[derive(Default)]
struct GateState {
    busy: usize,
    released: u64,
    stop: bool,
}

/// Admission to the gate, released on drop.
pub struct Ticket<'a> {
    gate: &'a Gate,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.gate.leave();
    }
}

impl Gate {
    pub fn new(capacity: usize, callback: Option<GateCallback>) -> Self {
        assert!(capacity != 0, "gate without capacity");
        Self {
            capacity,
            state: Mutex::new(GateState::default()),
            cv: Condvar::new(),
            callback,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of outstanding tickets.
    pub fn busy(&self) -> usize {
        self.state.lock().unwrap().busy
    }

    /// Block until a slot is free.
    pub fn enter(&self) -> Ticket<'_> {
        let mut st = self.state.lock().unwrap();
        while st.busy >= self.capacity || st.stop {
            st = self.cv.wait(st).unwrap();
        }
        st.busy += 1;
        Ticket { gate: self }
    }

    fn leave(&self) {
        let mut st = self.state.lock().unwrap();
        st.busy -= 1;
        st.released += 1;
        self.cv.notify_all();

        let callback = match self.callback.as_ref() {
            Some(cb) if !st.stop && st.released % self.capacity as u64 == 0 => cb,
            _ => return,
        };
        st.stop = true;
        while st.busy != 0 {
            st = self.cv.wait(st).unwrap();
        }
        drop(st);

        callback();

        let mut st = self.state.lock().unwrap();
        st.stop = false;
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn never_exceeds_capacity() {
        let gate = Arc::new(Gate::new(2, None));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handles = (0..8)
            .map(|_| {
                let (gate, running, peak) = (gate.clone(), running.clone(), peak.clone());
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _t = gate.enter();
                        let n = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(n, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(200));
                        running.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gate.busy(), 0);
    }

    #[test]
    fn release_on_error_path() {
        fn failing_exec(gate: &Gate) -> Result<(), String> {
            let _ticket = gate.enter();
            Err("broken pipe".to_string())
        }

        let gate = Gate::new(1, None);
        assert!(failing_exec(&gate).is_err());
        assert_eq!(gate.busy(), 0);
        drop(gate.enter());
        assert_eq!(gate.busy(), 0);
    }

    #[test]
    fn callback_runs_exclusively() {
        let calls = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new({
            let (calls, violations, outstanding) =
                (calls.clone(), violations.clone(), outstanding.clone());
            Gate::new(
                2,
                Some(Box::new(move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if outstanding.load(Ordering::SeqCst) != 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                })),
            )
        });
        let handles = (0..4)
            .map(|_| {
                let (gate, outstanding) = (gate.clone(), outstanding.clone());
                thread::spawn(move || {
                    for _ in 0..10 {
                        let t = gate.enter();
                        outstanding.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(100));
                        outstanding.fetch_sub(1, Ordering::SeqCst);
                        drop(t);
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 20);
        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }
}
