//! Values composition
//!
//! Builds the values document handed to Helm from the `valuesFrom` sources
//! of a HelmRelease plus its inline `values`:
//!
//! - sources are applied in order, so later ones win
//! - a source without `targetPath` is parsed as YAML and deep-merged
//! - a source with `targetPath` sets the raw content at that path
//! - inline values are merged last
//!
//! Each backing object is looked up at most once per composition. Only a
//! source that does not exist counts as missing; a failed lookup is an
//! error even for an optional source.

pub mod resolver;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Values, ValuesReference, ValuesSourceKind};

pub use resolver::{KubeValuesResolver, ValuesResolver};

/// What a single lookup produced.
#[derive(Debug, Clone)]
enum Resolved {
    /// A ConfigMap or Secret, keyed by data key
    Object(BTreeMap<String, String>),
    /// A whole document (URL or chart file)
    Document(String),
    /// The source does not exist; the reason is kept for the error
    Missing(String),
}

type CacheKey = (ValuesSourceKind, String, String);

/// Compose the effective values for one release.
///
/// `namespace` is the HelmRelease's namespace, used for references that do
/// not name one; `chart_path` anchors `ChartFile` references.
pub async fn compose(
    inline: Values,
    references: &[ValuesReference],
    namespace: &str,
    chart_path: &Path,
    resolver: &dyn ValuesResolver,
) -> Result<Values> {
    let mut result = Values::empty_map();
    let mut cache: BTreeMap<CacheKey, Resolved> = BTreeMap::new();

    for reference in references {
        let ns = reference
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(namespace);
        let key = cache_key(reference, ns);

        let resolved = match cache.entry(key) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let resolved = resolve(reference, ns, chart_path, resolver).await?;
                e.insert(resolved).clone()
            }
        };

        let content = match content_of(reference, &resolved) {
            Ok(content) => content,
            Err(reason) if reference.optional => {
                debug!(
                    kind = %reference.kind,
                    name = %reference.name,
                    reason = %reason,
                    "Skipping optional values source"
                );
                continue;
            }
            Err(reason) => return Err(Error::values(reason)),
        };

        match reference.target_path() {
            Some(path) => {
                result.set_path(path, content).map_err(|e| {
                    Error::values(format!(
                        "unable to set targetPath {} from {} {}: {}",
                        path, reference.kind, reference.name, e
                    ))
                })?;
            }
            None => {
                let document = Values::map_from_yaml_str(content).map_err(|e| {
                    Error::values(format!(
                        "unable to parse values from {} {}: {}",
                        reference.kind, reference.name, e
                    ))
                })?;
                result.merge(document);
            }
        }
        debug!(kind = %reference.kind, name = %reference.name, "Applied values source");
    }

    result.merge(inline);
    Ok(result)
}

fn cache_key(reference: &ValuesReference, namespace: &str) -> CacheKey {
    let ns = match reference.kind {
        ValuesSourceKind::ConfigMap | ValuesSourceKind::Secret => namespace.to_string(),
        ValuesSourceKind::ExternalUrl | ValuesSourceKind::ChartFile => String::new(),
    };
    (reference.kind, ns, reference.name.clone())
}

async fn resolve(
    reference: &ValuesReference,
    namespace: &str,
    chart_path: &Path,
    resolver: &dyn ValuesResolver,
) -> Result<Resolved> {
    let name = reference.name.as_str();
    let fetched = match reference.kind {
        ValuesSourceKind::ConfigMap => resolver
            .config_map(namespace, name)
            .await
            .map(|o| o.map(Resolved::Object)),
        ValuesSourceKind::Secret => resolver
            .secret(namespace, name)
            .await
            .map(|o| o.map(Resolved::Object)),
        ValuesSourceKind::ExternalUrl => resolver
            .fetch_url(name)
            .await
            .map(|o| o.map(Resolved::Document)),
        ValuesSourceKind::ChartFile => resolver
            .read_chart_file(chart_path, name)
            .await
            .map(|o| o.map(Resolved::Document)),
    };

    match fetched {
        Ok(Some(resolved)) => Ok(resolved),
        Ok(None) => Ok(Resolved::Missing(match reference.kind {
            ValuesSourceKind::ConfigMap | ValuesSourceKind::Secret => format!(
                "could not find {} '{}/{}'",
                reference.kind, namespace, name
            ),
            _ => format!("could not find {} '{}'", reference.kind, name),
        })),
        Err(e) => Err(Error::values(format!(
            "unable to resolve {} '{}': {}",
            reference.kind, name, e
        ))),
    }
}

fn content_of<'a>(
    reference: &ValuesReference,
    resolved: &'a Resolved,
) -> std::result::Result<&'a str, String> {
    match resolved {
        Resolved::Missing(reason) => Err(reason.clone()),
        Resolved::Document(content) => Ok(content),
        Resolved::Object(data) => {
            let key = reference.values_key();
            data.get(key).map(String::as_str).ok_or_else(|| {
                format!(
                    "missing key '{}' in {} '{}'",
                    key, reference.kind, reference.name
                )
            })
        }
    }
}
