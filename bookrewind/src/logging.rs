use crate::dataset::JOURNAL_SPAN_NAME;
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::{LevelFilter, dynamic_filter_fn},
    layer::{Filter, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Initialise default non-JSON `BookRewind` logging.
///
/// `RUST_LOG` overrides the default `INFO` level. Debug output of the load time journaling pass
/// is dropped, see [`journal_filter`].
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_filter(journal_filter()))
        .init()
}

/// Initialise default JSON `BookRewind` logging, one flattened JSON object per event.
pub fn init_json_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_filter(journal_filter()),
        )
        .init()
}

fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy()
}

/// Per-layer filter dropping events less severe than `INFO` while a dataset is being journaled.
///
/// Large recorded dumps verify every snapshot at `DEBUG`, which would otherwise drown the replay
/// logs of a session. Inconsistency warnings emitted while journaling are kept.
pub fn journal_filter<S>() -> impl Filter<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    dynamic_filter_fn(|metadata, ctx| {
        metadata.is_span()
            || *metadata.level() <= Level::INFO
            || ctx
                .lookup_current()
                .is_none_or(|span| span.name() != JOURNAL_SPAN_NAME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tracing::{Event, debug, info_span, warn};
    use tracing_subscriber::layer::Context;

    #[derive(Debug, Clone, Default)]
    struct CountEvents(Arc<AtomicUsize>);

    impl<S> Layer<S> for CountEvents
    where
        S: Subscriber,
    {
        fn on_event(&self, _: &Event<'_>, _: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_journal_filter_drops_debug_inside_journal_span() {
        let counter = CountEvents::default();
        let subscriber =
            tracing_subscriber::registry().with(counter.clone().with_filter(journal_filter()));

        tracing::subscriber::with_default(subscriber, || {
            debug!("kept: outside of the journal span");
            info_span!(JOURNAL_SPAN_NAME).in_scope(|| {
                debug!("dropped: journal noise");
                warn!("kept: inconsistency");
            });
            info_span!("replay").in_scope(|| debug!("kept: other span"));
        });

        assert_eq!(counter.0.load(Ordering::Relaxed), 3);
    }
}
