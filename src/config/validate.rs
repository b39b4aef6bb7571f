// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::PekitConfig;
use crate::orchestrator::role::Role;

// ---------------------------------------------------------------------------
// Validation errors, rendered with miette
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("[{role}] has an empty image")]
    #[diagnostic(code(pekit::empty_image))]
    EmptyImage {
        #[source_code]
        src: NamedSource<String>,
        #[label("image is empty")]
        span: SourceSpan,
        role: Role,
    },

    #[error("[{role}] has an empty container_name")]
    #[diagnostic(code(pekit::empty_container_name))]
    EmptyContainerName {
        #[source_code]
        src: NamedSource<String>,
        #[label("container_name is empty")]
        span: SourceSpan,
        role: Role,
    },

    #[error("container name `{name}` is used by both master and agent")]
    #[diagnostic(
        code(pekit::duplicate_container_name),
        help("container names must be unique on the host")
    )]
    DuplicateContainerName {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate name")]
        span: SourceSpan,
        name: String,
    },

    #[error("invalid hostname `{hostname}` for [{role}]")]
    #[diagnostic(
        code(pekit::invalid_hostname),
        help("hostnames must be non-empty and contain no whitespace")
    )]
    InvalidHostname {
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid hostname")]
        span: SourceSpan,
        role: Role,
        hostname: String,
    },

    #[error("selected image `{selected}` does not belong to `{pattern}`")]
    #[diagnostic(code(pekit::foreign_selected_image))]
    ForeignSelectedImage {
        #[source_code]
        src: NamedSource<String>,
        #[label("expected an image starting with `{pattern}`")]
        span: SourceSpan,
        selected: String,
        pattern: String,
    },

    #[error("timing.{field} must be greater than zero")]
    #[diagnostic(code(pekit::zero_interval))]
    ZeroInterval {
        #[source_code]
        src: NamedSource<String>,
        #[label("zero interval")]
        span: SourceSpan,
        field: String,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Find the byte offset of a TOML table header like `[master]`.
fn find_table_span(source: &str, section: &str) -> SourceSpan {
    let header = format!("[{}]", section);
    if let Some(pos) = source.find(&header) {
        return (pos + 1, section.len()).into();
    }
    (0, 0).into()
}

/// Find the byte offset of a specific field value in a TOML section.
fn find_field_span(source: &str, section: &str, field: &str) -> SourceSpan {
    let table_header = format!("[{}]", section);
    let Some(search_start) = source.find(&table_header) else {
        return (0, 0).into();
    };
    let after_header = &source[search_start..];
    // Stop at the next table so a field of the same name further down is not matched.
    let section_len = after_header[1..]
        .find("\n[")
        .map(|p| p + 1)
        .unwrap_or(after_header.len());
    let section_text = &after_header[..section_len];

    for prefix in [format!("{} =", field), format!("{}=", field)] {
        if let Some(rel_pos) = section_text.find(&prefix) {
            let abs_pos = search_start + rel_pos;
            if let Some(eq) = source[abs_pos..].find('=') {
                let val_start = abs_pos + eq + 1;
                let val_trimmed = source[val_start..].trim_start();
                let trim_offset = val_start + (source[val_start..].len() - val_trimmed.len());
                let val_end = val_trimmed.find('\n').unwrap_or(val_trimmed.len());
                return (trim_offset, val_end).into();
            }
        }
    }

    find_table_span(source, section)
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

/// Check the loaded settings, collecting every problem instead of stopping
/// at the first one.
pub fn validate(
    config: &PekitConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());

    for role in Role::ALL {
        let section = role.as_str();
        let rc = config.role(role);

        if rc.image.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyImage {
                src: src.clone(),
                span: find_field_span(source, section, "image"),
                role,
            });
        }

        if rc.container_name.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyContainerName {
                src: src.clone(),
                span: find_field_span(source, section, "container_name"),
                role,
            });
        }

        if rc.hostname.is_empty() || rc.hostname.chars().any(char::is_whitespace) {
            errors.push(ConfigDiagnostic::InvalidHostname {
                src: src.clone(),
                span: find_field_span(source, section, "hostname"),
                role,
                hostname: rc.hostname.clone(),
            });
        }

        if let Some(selected) = &rc.selected_image {
            if !rc.image.is_empty() && !selected.starts_with(&rc.image) {
                errors.push(ConfigDiagnostic::ForeignSelectedImage {
                    src: src.clone(),
                    span: find_field_span(source, section, "selected_image"),
                    selected: selected.clone(),
                    pattern: rc.image.clone(),
                });
            }
        }
    }

    if !config.master.container_name.is_empty()
        && config.master.container_name == config.agent.container_name
    {
        errors.push(ConfigDiagnostic::DuplicateContainerName {
            src: src.clone(),
            span: find_field_span(source, "agent", "container_name"),
            name: config.agent.container_name.clone(),
        });
    }

    let timing = &config.timing;
    let intervals = [
        ("health_interval_ms", timing.health_interval_ms),
        ("provision_poll_ms", timing.provision_poll_ms),
        ("probe_timeout_secs", timing.probe_timeout_secs),
    ];
    for (field, value) in intervals {
        if value == 0 {
            errors.push(ConfigDiagnostic::ZeroInterval {
                src: src.clone(),
                span: find_field_span(source, "timing", field),
                field: field.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
