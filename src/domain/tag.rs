//! Tag-name grammar and version templates.
//!
//! Ledger tags encode a full version identity in their name:
//!
//! ```text
//! app-name_<major>.<minor>.<patch>[.<hotfix>][-<label><count>][+<buildmetadata>]
//! ```
//!
//! Path separators in app names are encoded as dashes. Root apps use a
//! parallel family `root-name_<integer>`. Parsing and serialization
//! round-trip exactly for every grammar-valid tag.

use crate::domain::version::VersionNumber;
use crate::error::{Result, VerstampError};
use regex::Regex;

/// Default version template used when an app configures none (or a broken one).
pub const DEFAULT_TEMPLATE: &str = "{major}.{minor}.{patch}[.{hotfix}][-{prerelease}]";

/// Upper bound on a rendered version string, keeping tag names well-formed.
pub const MAX_RENDERED_LEN: usize = 30;

/// Encode an app name for use in a tag name (path separators become dashes).
pub fn encode_app_name(app_name: &str) -> String {
    app_name.replace('/', "-")
}

/// Validate a trackable app name: one or more `/`-separated segments of
/// `[0-9A-Za-z_-]`, each starting alphanumeric. The version part of a tag
/// anchors on digits, so underscores in app names stay unambiguous.
pub fn validate_app_name(app_name: &str) -> Result<()> {
    let ok = !app_name.is_empty()
        && app_name.split('/').all(|seg| {
            !seg.is_empty()
                && seg.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    if ok {
        Ok(())
    } else {
        Err(VerstampError::format(format!(
            "Invalid app name: '{}' - segments must match [0-9A-Za-z][0-9A-Za-z_-]*",
            app_name
        )))
    }
}

/// A parsed ledger tag name for a versioned app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagName {
    /// Dash-encoded app name segment.
    pub app: String,
    pub version: VersionNumber,
    /// Prerelease label and counter, when present.
    pub prerelease: Option<(String, u32)>,
    pub buildmetadata: Option<String>,
}

fn tag_regex() -> Regex {
    // The label is lazy and the counter greedy, so `rc12` splits as
    // ("rc", 12); labels themselves may not end with a digit.
    Regex::new(
        r"^(?P<app>[0-9A-Za-z][0-9A-Za-z_-]*)_(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)(?:\.(?P<hotfix>\d+))?(?:-(?P<label>[A-Za-z][0-9A-Za-z_]*?)(?P<count>[1-9]\d*))?(?:\+(?P<bm>[0-9A-Za-z.-]+))?$",
    )
    .expect("tag grammar regex is valid")
}

impl TagName {
    /// Build the tag name for an app version.
    pub fn for_app(
        app_name: &str,
        version: VersionNumber,
        prerelease: Option<(String, u32)>,
    ) -> TagName {
        TagName {
            app: encode_app_name(app_name),
            version,
            prerelease,
            buildmetadata: None,
        }
    }

    /// Parse a tag name; fails for anything outside the grammar.
    pub fn parse(tag: &str) -> Result<TagName> {
        let caps = tag_regex()
            .captures(tag)
            .ok_or_else(|| VerstampError::format(format!("Tag '{}' does not match the version tag grammar", tag)))?;

        let octet = |name: &str| -> u32 {
            caps.name(name)
                .map(|m| m.as_str().parse::<u32>().unwrap_or(0))
                .unwrap_or(0)
        };

        let prerelease = match (caps.name("label"), caps.name("count")) {
            (Some(label), Some(count)) => {
                let n = count.as_str().parse::<u32>().map_err(|_| {
                    VerstampError::format(format!("Invalid prerelease counter in tag '{}'", tag))
                })?;
                Some((label.as_str().to_string(), n))
            }
            _ => None,
        };

        Ok(TagName {
            app: caps["app"].to_string(),
            version: VersionNumber::new(octet("major"), octet("minor"), octet("patch"), octet("hotfix")),
            prerelease,
            buildmetadata: caps.name("bm").map(|m| m.as_str().to_string()),
        })
    }

    /// Serialize back to the grammar; `parse(serialize(t)) == t` for every
    /// grammar-valid tag.
    pub fn serialize(&self) -> String {
        let mut out = format!("{}_{}", self.app, self.version.format(false));
        if let Some((label, count)) = &self.prerelease {
            out.push('-');
            out.push_str(label);
            out.push_str(&count.to_string());
        }
        if let Some(bm) = &self.buildmetadata {
            out.push('+');
            out.push_str(bm);
        }
        out
    }

    /// The version part of the tag (everything after the app segment).
    pub fn version_string(&self) -> String {
        let full = self.serialize();
        full[self.app.len() + 1..].to_string()
    }

    /// True when this tag belongs to the given (unencoded) app name.
    pub fn matches_app(&self, app_name: &str) -> bool {
        self.app == encode_app_name(app_name)
    }

    pub fn is_release(&self) -> bool {
        self.prerelease.is_none()
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

/// Parse a bare version string (`1.2.3`, `1.2.3-rc2`, `1.2.3-rc2+build.5`)
/// into its components. Same grammar as the tag suffix.
pub fn parse_version_string(
    s: &str,
) -> Result<(VersionNumber, Option<(String, u32)>, Option<String>)> {
    // Reuse the tag grammar with a synthetic app segment.
    let tag = TagName::parse(&format!("v_{}", s))
        .map_err(|_| VerstampError::version(format!("Invalid version string: '{}'", s)))?;
    Ok((tag.version, tag.prerelease, tag.buildmetadata))
}

/// A parsed root-app tag: `<root>_<integer>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootTagName {
    pub root: String,
    pub counter: u64,
}

impl RootTagName {
    pub fn for_root(root_name: &str, counter: u64) -> RootTagName {
        RootTagName {
            root: encode_app_name(root_name),
            counter,
        }
    }

    pub fn parse(tag: &str) -> Result<RootTagName> {
        let re = Regex::new(r"^(?P<root>[0-9A-Za-z][0-9A-Za-z_-]*)_(?P<n>\d+)$")
            .expect("root tag regex is valid");
        let caps = re.captures(tag).ok_or_else(|| {
            VerstampError::format(format!("Tag '{}' does not match the root tag grammar", tag))
        })?;
        let counter = caps["n"].parse::<u64>().map_err(|_| {
            VerstampError::format(format!("Invalid root counter in tag '{}'", tag))
        })?;
        Ok(RootTagName {
            root: caps["root"].to_string(),
            counter,
        })
    }

    pub fn serialize(&self) -> String {
        format!("{}_{}", self.root, self.counter)
    }
}

/// Name of the mutable per-branch index tag ("latest stamped on branch").
/// Never parseable as a version tag, and never authoritative.
pub fn moving_tag_name(app_name: &str, branch: &str) -> String {
    format!(
        "{}_latest-{}",
        encode_app_name(app_name),
        branch.replace('/', "-")
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Major,
    Minor,
    Patch,
    Hotfix,
    Prerelease,
}

impl Field {
    fn parse(name: &str) -> Option<Field> {
        match name {
            "major" => Some(Field::Major),
            "minor" => Some(Field::Minor),
            "patch" => Some(Field::Patch),
            "hotfix" => Some(Field::Hotfix),
            "prerelease" => Some(Field::Prerelease),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(Field),
    /// Elidable group: rendered only while every field inside is present.
    Group(Vec<Segment>),
}

fn parse_template(template: &str) -> Result<Vec<Segment>> {
    let bad = |why: &str| VerstampError::format(format!("Invalid template '{}': {}", template, why));

    let mut segments = Vec::new();
    let mut group: Option<Vec<Segment>> = None;
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '[' => {
                if group.is_some() {
                    return Err(bad("nested brackets"));
                }
                group = Some(Vec::new());
            }
            ']' => {
                let inner = group.take().ok_or_else(|| bad("unmatched ']'"))?;
                if !inner.iter().any(|s| matches!(s, Segment::Field(_))) {
                    return Err(bad("bracket group without a placeholder"));
                }
                segments.push(Segment::Group(inner));
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_alphabetic() => name.push(c),
                        _ => return Err(bad("unterminated placeholder")),
                    }
                }
                let field = Field::parse(&name)
                    .ok_or_else(|| bad(&format!("unknown placeholder '{{{}}}'", name)))?;
                let target = group.as_mut().unwrap_or(&mut segments);
                target.push(Segment::Field(field));
            }
            '}' => return Err(bad("unmatched '}'")),
            other => {
                let target = group.as_mut().unwrap_or(&mut segments);
                if let Some(Segment::Text(t)) = target.last_mut() {
                    t.push(other);
                } else {
                    target.push(Segment::Text(other.to_string()));
                }
            }
        }
    }

    if group.is_some() {
        return Err(bad("unmatched '['"));
    }
    Ok(segments)
}

/// Validate a template without rendering it.
pub fn validate_template(template: &str) -> Result<()> {
    parse_template(template).map(|_| ())
}

/// Render a version through a template.
///
/// `[...]` groups are elided when any referenced value is absent (release
/// versions have no prerelease) or zero. Callers are expected to have fallen
/// back to [DEFAULT_TEMPLATE] on validation failure; a malformed template
/// here is still an error, not a panic.
pub fn format_with_template(
    template: &str,
    version: &VersionNumber,
    prerelease: Option<(&str, u32)>,
) -> Result<String> {
    let segments = parse_template(template)?;

    let field_value = |field: Field| -> Option<String> {
        match field {
            Field::Major => Some(version.major.to_string()),
            Field::Minor => Some(version.minor.to_string()),
            Field::Patch => Some(version.patch.to_string()),
            Field::Hotfix => Some(version.hotfix.to_string()),
            Field::Prerelease => prerelease.map(|(label, n)| format!("{}{}", label, n)),
        }
    };
    let field_present = |field: Field| -> bool {
        match field {
            Field::Major => version.major != 0,
            Field::Minor => version.minor != 0,
            Field::Patch => version.patch != 0,
            Field::Hotfix => version.hotfix != 0,
            Field::Prerelease => prerelease.is_some(),
        }
    };

    let mut out = String::new();
    for segment in &segments {
        match segment {
            Segment::Text(t) => out.push_str(t),
            Segment::Field(f) => out.push_str(&field_value(*f).unwrap_or_default()),
            Segment::Group(inner) => {
                let all_present = inner.iter().all(|s| match s {
                    Segment::Field(f) => field_present(*f),
                    _ => true,
                });
                if all_present {
                    for s in inner {
                        match s {
                            Segment::Text(t) => out.push_str(t),
                            Segment::Field(f) => out.push_str(&field_value(*f).unwrap_or_default()),
                            Segment::Group(_) => unreachable!("groups do not nest"),
                        }
                    }
                }
            }
        }
    }

    if out.len() > MAX_RENDERED_LEN {
        return Err(VerstampError::format(format!(
            "Rendered version '{}' exceeds {} characters",
            out, MAX_RENDERED_LEN
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_tag() {
        let tag = TagName::parse("web-api_1.2.3").unwrap();
        assert_eq!(tag.app, "web-api");
        assert_eq!(tag.version, VersionNumber::new(1, 2, 3, 0));
        assert!(tag.is_release());
        assert!(tag.buildmetadata.is_none());
    }

    #[test]
    fn test_parse_hotfix_tag() {
        let tag = TagName::parse("svc_1.2.3.7").unwrap();
        assert_eq!(tag.version, VersionNumber::new(1, 2, 3, 7));
    }

    #[test]
    fn test_parse_prerelease_tag() {
        let tag = TagName::parse("svc_1.3.0-rc2").unwrap();
        assert_eq!(tag.prerelease, Some(("rc".to_string(), 2)));
        assert!(!tag.is_release());
    }

    #[test]
    fn test_parse_prerelease_multidigit_counter() {
        let tag = TagName::parse("svc_1.3.0-rc12").unwrap();
        assert_eq!(tag.prerelease, Some(("rc".to_string(), 12)));
    }

    #[test]
    fn test_parse_buildmetadata_tag() {
        let tag = TagName::parse("svc_1.3.0-rc2+linux.x64-v2").unwrap();
        assert_eq!(tag.buildmetadata, Some("linux.x64-v2".to_string()));
    }

    #[test]
    fn test_parse_rejects_non_version_tags() {
        assert!(TagName::parse("svc_latest-main").is_err());
        assert!(TagName::parse("svc_5").is_err());
        assert!(TagName::parse("svc-1.2.3").is_err());
        assert!(TagName::parse("svc_1.2.3-rc0").is_err());
        assert!(TagName::parse("").is_err());
    }

    #[test]
    fn test_round_trip() {
        for raw in [
            "app_0.0.1",
            "app_1.2.3.4",
            "group-svc_10.20.30-beta7",
            "app_1.2.3+meta.1-x",
            "app_2.0.0-rc1+b5",
        ] {
            let parsed = TagName::parse(raw).unwrap();
            assert_eq!(parsed.serialize(), raw);
        }
    }

    #[test]
    fn test_app_name_encoding() {
        let tag = TagName::for_app("group/svc", VersionNumber::new(1, 0, 0, 0), None);
        assert_eq!(tag.serialize(), "group-svc_1.0.0");
        assert!(tag.matches_app("group/svc"));
        assert!(!tag.matches_app("group/other"));
    }

    #[test]
    fn test_version_string() {
        let tag = TagName::parse("svc_1.3.0-rc2+b5").unwrap();
        assert_eq!(tag.version_string(), "1.3.0-rc2+b5");
    }

    #[test]
    fn test_parse_version_string() {
        let (v, pre, bm) = parse_version_string("1.3.0-rc2").unwrap();
        assert_eq!(v, VersionNumber::new(1, 3, 0, 0));
        assert_eq!(pre, Some(("rc".to_string(), 2)));
        assert!(bm.is_none());

        let (v, pre, bm) = parse_version_string("2.0.0").unwrap();
        assert_eq!(v, VersionNumber::new(2, 0, 0, 0));
        assert!(pre.is_none());
        assert!(bm.is_none());

        assert!(parse_version_string("not-a-version").is_err());
    }

    #[test]
    fn test_root_tag_round_trip() {
        let tag = RootTagName::parse("platform_17").unwrap();
        assert_eq!(tag.root, "platform");
        assert_eq!(tag.counter, 17);
        assert_eq!(tag.serialize(), "platform_17");
        assert!(RootTagName::parse("platform_1.2.3").is_err());
    }

    #[test]
    fn test_moving_tag_name_is_not_a_version_tag() {
        let name = moving_tag_name("group/svc", "feature/x");
        assert_eq!(name, "group-svc_latest-feature-x");
        assert!(TagName::parse(&name).is_err());
    }

    #[test]
    fn test_validate_app_name() {
        assert!(validate_app_name("svc").is_ok());
        assert!(validate_app_name("group/svc-2").is_ok());
        assert!(validate_app_name("test_app").is_ok());
        assert!(validate_app_name("/svc").is_err());
        assert!(validate_app_name("-svc").is_err());
        assert!(validate_app_name("").is_err());
    }

    #[test]
    fn test_underscored_app_names_parse_unambiguously() {
        let tag = TagName::parse("test_app_0.0.1").unwrap();
        assert_eq!(tag.app, "test_app");
        assert_eq!(tag.version, VersionNumber::new(0, 0, 1, 0));
        assert_eq!(tag.serialize(), "test_app_0.0.1");
    }

    #[test]
    fn test_template_default_release() {
        let v = VersionNumber::new(1, 2, 3, 0);
        let s = format_with_template(DEFAULT_TEMPLATE, &v, None).unwrap();
        assert_eq!(s, "1.2.3");
    }

    #[test]
    fn test_template_default_hotfix_and_prerelease() {
        let v = VersionNumber::new(1, 2, 3, 4);
        let s = format_with_template(DEFAULT_TEMPLATE, &v, Some(("rc", 2))).unwrap();
        assert_eq!(s, "1.2.3.4-rc2");
    }

    #[test]
    fn test_template_elides_zero_group() {
        let v = VersionNumber::new(1, 2, 0, 0);
        let s = format_with_template("{major}.{minor}[.{patch}]", &v, None).unwrap();
        assert_eq!(s, "1.2");
    }

    #[test]
    fn test_template_custom_literal() {
        let v = VersionNumber::new(1, 2, 3, 0);
        let s = format_with_template("v{major}.{minor}.{patch}", &v, None).unwrap();
        assert_eq!(s, "v1.2.3");
    }

    #[test]
    fn test_template_validation_failures() {
        assert!(validate_template("{unknown}").is_err());
        assert!(validate_template("{major").is_err());
        assert!(validate_template("[literal-only]").is_err());
        assert!(validate_template("[[{major}]]").is_err());
        assert!(validate_template("{major}]").is_err());
    }

    #[test]
    fn test_template_rendered_length_bound() {
        let v = VersionNumber::new(1, 2, 3, 0);
        let template = "a-very-long-release-prefix-here-{major}";
        assert!(validate_template(template).is_ok());
        assert!(format_with_template(template, &v, None).is_err());
    }

    #[test]
    fn test_default_template_is_valid() {
        assert!(validate_template(DEFAULT_TEMPLATE).is_ok());
    }
}
