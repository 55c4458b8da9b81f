mod propagation;
mod telemetry;

pub use propagation::current_traceparent;
pub use telemetry::{init_otel, OtelGuard};
