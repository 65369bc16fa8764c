//! Classes every environment needs before any module is loaded.

use hostbridge_core::{BridgeResult, ClassState, ExecutionContext, NativeClass};

use crate::class_builder::ClassDescriptor;
use crate::inspect::{Inspector, inspector_class};
use crate::iterator::{NativeIterator, iterator_class};

fn ensure<T: NativeClass>(cx: &ExecutionContext, descriptor: impl FnOnce() -> ClassDescriptor<T>) -> BridgeResult<()> {
    if cx.class_state::<T>() == ClassState::Unbound {
        tracing::trace!(class = T::NAME, "registering builtin class");
        descriptor().register(cx)?;
    }
    Ok(())
}

/// Register the inspector and iterator classes if this environment has not
/// bound them yet. Idempotent.
pub fn ensure_builtin_classes(cx: &ExecutionContext) -> BridgeResult<()> {
    ensure::<Inspector>(cx, inspector_class)?;
    ensure::<NativeIterator>(cx, iterator_class)
}
