//! Composite response assembly and upstream payload transforms.

use serde::Deserialize;
use serde::de::IgnoredAny;

use crate::error::GatewayError;
use crate::resource::{LogicalResource, Transform};

/// Maximum number of release versions advertised to clients.
pub const MAX_VERSIONS: usize = 5;

/// The subset of a GitHub release object the gateway reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
}

/// Newest stable version names from a newest-first release listing.
///
/// Considers the first `min(MAX_VERSIONS, len)` entries, widening the window
/// by one for every prerelease or draft skipped, and strips a leading `v`.
/// Returns `None` when nothing qualifies.
pub fn extract_versions(releases: &[Release]) -> Option<Vec<String>> {
    let wanted = releases.len().min(MAX_VERSIONS);
    let versions: Vec<String> = releases
        .iter()
        .filter(|release| !release.prerelease && !release.draft)
        .take(wanted)
        .map(|release| {
            release
                .tag_name
                .strip_prefix('v')
                .unwrap_or(&release.tag_name)
                .to_string()
        })
        .collect();

    (!versions.is_empty()).then_some(versions)
}

/// Turn a successful upstream body into the string stored for `resource`.
///
/// `Ok(None)` means the payload was well-formed but yielded nothing worth
/// caching.
pub fn apply_transform(
    resource: LogicalResource,
    transform: Option<Transform>,
    body: &str,
) -> Result<Option<String>, GatewayError> {
    let payload_error = |e: serde_json::Error| GatewayError::payload(resource.name(), e);
    match transform {
        Some(Transform::ReleaseVersions) => {
            let releases: Vec<Release> = serde_json::from_str(body).map_err(payload_error)?;
            extract_versions(&releases)
                .map(|versions| serde_json::to_string(&versions))
                .transpose()
                .map_err(payload_error)
        }
        None => {
            // Validate only; key order of the upstream document is preserved.
            serde_json::from_str::<IgnoredAny>(body).map_err(payload_error)?;
            Ok(Some(body.trim().to_string()))
        }
    }
}

/// One value (or its absence) per logical resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceValues {
    pub versions: Option<String>,
    pub modules: Option<String>,
    pub presets: Option<String>,
}

impl ResourceValues {
    /// Build from values ordered like [`LogicalResource::ALL`].
    pub fn from_positional(values: Vec<Option<String>>) -> Self {
        let mut values = values.into_iter();
        Self {
            versions: values.next().flatten(),
            modules: values.next().flatten(),
            presets: values.next().flatten(),
        }
    }

    pub fn get(&self, resource: LogicalResource) -> Option<&str> {
        match resource {
            LogicalResource::ReleaseVersions => self.versions.as_deref(),
            LogicalResource::Modules => self.modules.as_deref(),
            LogicalResource::PresetModules => self.presets.as_deref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.versions.is_some() && self.modules.is_some() && self.presets.is_some()
    }

    /// Field-wise preference for `self`, falling back to `existing`.
    pub fn or(self, existing: ResourceValues) -> Self {
        Self {
            versions: self.versions.or(existing.versions),
            modules: self.modules.or(existing.modules),
            presets: self.presets.or(existing.presets),
        }
    }
}

/// Assemble the composite `{"v":…,"m":…,"p":…}` payload.
///
/// Fresh values win over previously cached ones. The text is built by hand
/// so the field order and spacing never change; clients cache it verbatim.
pub fn assemble(fetched: ResourceValues, existing: ResourceValues) -> String {
    let values = fetched.or(existing);
    format!(
        "{{\"v\":{},\"m\":{},\"p\":{}}}",
        values.versions.as_deref().unwrap_or("null"),
        values.modules.as_deref().unwrap_or("null"),
        values.presets.as_deref().unwrap_or("null"),
    )
}

/// The parts of a composite payload the download proxy needs.
#[derive(Debug, Deserialize)]
pub struct CompositeVersions {
    #[serde(rename = "v")]
    pub versions: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool) -> Release {
        Release {
            tag_name: tag.to_string(),
            prerelease,
            draft: false,
        }
    }

    #[test]
    fn skips_prereleases_and_widens_window() {
        let tags = ["v3.0", "v2.9-pre", "v2.8", "v2.7", "v2.6-pre", "v2.5", "v2.4"];
        let releases: Vec<Release> = tags
            .iter()
            .enumerate()
            .map(|(i, tag)| release(tag, i == 1 || i == 4))
            .collect();

        assert_eq!(
            extract_versions(&releases),
            Some(vec![
                "3.0".to_string(),
                "2.8".to_string(),
                "2.7".to_string(),
                "2.5".to_string(),
                "2.4".to_string(),
            ])
        );
    }

    #[test]
    fn skips_drafts_and_keeps_unprefixed_tags() {
        let releases = vec![
            Release {
                tag_name: "9.9.9".into(),
                prerelease: false,
                draft: true,
            },
            release("9.9.8", false),
            release("v9.9.7", false),
        ];
        assert_eq!(
            extract_versions(&releases),
            Some(vec!["9.9.8".to_string(), "9.9.7".to_string()])
        );
    }

    #[test]
    fn stops_at_five() {
        let releases: Vec<Release> = (0..8).map(|i| release(&format!("v1.{i}"), false)).collect();
        let versions = extract_versions(&releases).unwrap();
        assert_eq!(versions.len(), MAX_VERSIONS);
        assert_eq!(versions[0], "1.0");
        assert_eq!(versions[4], "1.4");
    }

    #[test]
    fn no_qualifying_versions_is_none() {
        assert_eq!(extract_versions(&[]), None);
        assert_eq!(extract_versions(&[release("v1.0-rc", true)]), None);
    }

    #[test]
    fn release_transform_emits_json_array() {
        let body = r#"[{"tag_name":"v9.9.9","prerelease":false,"draft":false,"assets":[]},
                       {"tag_name":"v9.9.8-beta","prerelease":true}]"#;
        let value =
            apply_transform(LogicalResource::ReleaseVersions, Some(Transform::ReleaseVersions), body)
                .unwrap();
        assert_eq!(value.as_deref(), Some(r#"["9.9.9"]"#));
    }

    #[test]
    fn json_passthrough_keeps_document() {
        let value =
            apply_transform(LogicalResource::Modules, None, "\n{\"z\":1,\"a\":[1, 2]}\n").unwrap();
        assert_eq!(value.as_deref(), Some(r#"{"z":1,"a":[1, 2]}"#));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = apply_transform(LogicalResource::PresetModules, None, "<html>").unwrap_err();
        assert!(matches!(err, GatewayError::Payload { resource: "preset-modules", .. }));
    }

    #[test]
    fn assemble_prefers_fresh_values_in_fixed_order() {
        let fetched = ResourceValues {
            versions: Some(r#"["2.0"]"#.into()),
            modules: None,
            presets: None,
        };
        let existing = ResourceValues {
            versions: Some(r#"["1.0"]"#.into()),
            modules: Some(r#"{"m":1}"#.into()),
            presets: None,
        };

        assert_eq!(
            assemble(fetched, existing),
            r#"{"v":["2.0"],"m":{"m":1},"p":null}"#
        );
    }

    #[test]
    fn composite_versions_parse() {
        let parsed: CompositeVersions =
            serde_json::from_str(r#"{"v":["9.9.9"],"m":null,"p":null}"#).unwrap();
        assert_eq!(parsed.versions, Some(vec!["9.9.9".to_string()]));
    }
}
