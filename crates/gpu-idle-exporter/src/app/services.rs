use std::sync::Arc;

use crate::infrastructure::gpu::NvmlSource;
use crate::infrastructure::metrics::IdleMetrics;
use crate::infrastructure::IdleObserver;

/// Application dependencies - simple struct with Arc-wrapped services
pub struct ApplicationServices {
    pub observer: Arc<IdleObserver<NvmlSource>>,
    pub metrics: Arc<IdleMetrics>,
}
