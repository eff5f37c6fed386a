use std::future::Future;
use std::time::Duration;

use candl_core::Symbol;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Fixed-interval re-fetch of the current symbol. Armed once per current
/// symbol; each tick hands off to the coordinator, which decides whether to
/// skip because something is already in flight.
pub struct RefreshScheduler {
    interval: Duration,
    symbol: Option<Symbol>,
    timer: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            symbol: None,
            timer: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start ticking for `symbol`; the first tick lands one full interval from
    /// now. Replaces any timer armed for another symbol. Ticks are spawned as
    /// detached tasks so disarming never interrupts a running refresh.
    pub fn arm<F, Fut>(&mut self, symbol: Symbol, mut on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm();

        let period = self.interval;
        tracing::debug!("Refresh armed for {} every {:?}", symbol, period);
        self.symbol = Some(symbol);
        self.timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                tokio::spawn(on_tick());
            }
        }));
    }

    pub fn is_armed_for(&self, symbol: &Symbol) -> bool {
        self.symbol.as_ref() == Some(symbol) && self.timer.is_some()
    }

    pub fn armed_symbol(&self) -> Option<&Symbol> {
        self.timer.as_ref().and(self.symbol.as_ref())
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
            if let Some(symbol) = &self.symbol {
                tracing::debug!("Refresh disarmed for {}", symbol);
            }
        }
        self.symbol = None;
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
