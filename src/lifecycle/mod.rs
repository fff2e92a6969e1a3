//! Background lifecycle polling
//!
//! Fixed-interval power-state sampling that asserts or releases the
//! display's stay-awake directive.

mod poller;
mod power;

pub use poller::LifecyclePoller;
pub use power::{PowerSource, StayAwake, SysfsPowerSource, TracingStayAwake};

#[cfg(test)]
pub(crate) use poller::tests as fakes;
