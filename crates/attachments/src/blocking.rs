use std::{
	any::Any,
	panic::{self, AssertUnwindSafe},
};

use tokio::{
	sync::oneshot,
	task::{spawn_blocking, JoinError},
};
use tracing::error;

/// Runs CPU bound work on the blocking pool, turning panics from third party decoders into
/// errors instead of tearing down the caller.
pub(crate) async fn run_blocking<T, E>(
	work: impl FnOnce() -> Result<T, E> + Send + 'static,
	on_panic: impl FnOnce(String) -> E,
) -> Result<T, E>
where
	T: Send + 'static,
	E: From<JoinError> + Send + 'static,
{
	let (tx, rx) = oneshot::channel();

	// Using channel instead of waiting the JoinHandle as for some reason
	// the JoinHandle can take some extra time to complete
	let handle = spawn_blocking(move || {
		// Handling error on receiver side
		let _ = tx.send(panic::catch_unwind(AssertUnwindSafe(work)));
	});

	match rx.await {
		Ok(Ok(res)) => res,
		Ok(Err(payload)) => {
			let reason = panic_reason(&*payload);
			error!(%reason, "Blocking work panicked;");
			Err(on_panic(reason))
		}
		Err(_) => match handle.await {
			Err(e) => Err(e.into()),
			Ok(()) => Err(on_panic("blocking task dropped its result".to_string())),
		},
	}
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(ToString::to_string)
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "Internal panic on third party crate".to_string())
}
