mod tracer;

pub use tracer::NetworkTracer;
