//! Fan-out of a per-platform build action and assembly of its results.

use crate::error::{Error, Result};
use crate::platform::{ensure_unique, PlatformRef};
use futures::future::try_join_all;
use std::future::Future;
use tracing::{debug, info};


/// Anything built for one platform.
pub trait Variant {
    fn platform(&self) -> &PlatformRef;
}

/// Results of a fan-out: the variant for the current platform, if it was
/// requested, and the others in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled<V> {
    pub(crate) primary: Option<V>,
    pub(crate) variants: Vec<V>,
}

impl<V: Variant> Assembled<V> {
    /// Primary first, then the other variants.
    pub fn platforms(&self) -> Vec<PlatformRef> {
        self.primary
            .iter()
            .chain(self.variants.iter())
            .map(|v| v.platform().clone())
            .collect()
    }
}

/// Run `action` once per requested platform and split the results into
/// the primary (the variant for `current`) and the secondary variants.
///
/// An empty request builds for `current` only. Actions run concurrently;
/// results keep request order whatever order they complete in. The first
/// failure aborts the whole call, dropping the actions still in flight.
pub async fn assemble<V, F, Fut>(
    requested: &[PlatformRef],
    current: &PlatformRef,
    action: F,
) -> Result<Assembled<V>>
where
    V: Variant,
    F: Fn(PlatformRef) -> Fut,
    Fut: Future<Output = Result<V>>,
{
    let platforms = if requested.is_empty() {
        vec![current.clone()]
    } else {
        requested.to_vec()
    };
    ensure_unique(&platforms)?;

    info!(
        "Building for {} platform(s): {}",
        platforms.len(),
        platforms
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let builds = platforms.iter().map(|platform| {
        let platform = platform.clone();
        let build = action(platform.clone());
        async move {
            debug!("Building variant for {}", platform);
            build.await.map_err(|source| Error::BuildAction {
                platform,
                source: Box::new(source),
            })
        }
    });
    let results = try_join_all(builds).await?;

    let mut primary = None;
    let mut variants = Vec::with_capacity(results.len());
    for variant in results {
        if variant.platform() == current {
            primary = Some(variant);
        } else {
            variants.push(variant);
        }
    }

    Ok(Assembled { primary, variants })
}
