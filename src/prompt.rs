//! Prompt-part mapping: ACP prompt content → the agent's user-message shape.
//!
//! The mapping is exact and order-preserving:
//!
//! - text passes through after the `/mcp:<server>:<command>` prefix rewrite;
//! - resource links become `[@<basename>](<uri>)` text blocks for `file://`
//!   and `zed://` URIs, the URI verbatim otherwise;
//! - embedded text resources add the same link inline plus a `<context>`
//!   block appended at the end of the message (blob resources are ignored);
//! - images prefer the base64 branch over the URL branch;
//! - audio and unknown chunk types are ignored.

use serde_json::{json, Value};

use crate::acp::schema::AcpContentBlock;

/// Flatten ACP prompt parts into agent user-message content blocks.
///
/// An empty part list produces an empty content array; the turn still runs
/// normally.
#[must_use]
pub fn to_agent_content(parts: &[AcpContentBlock]) -> Vec<Value> {
    let mut blocks = Vec::new();
    let mut trailing_context = Vec::new();

    for part in parts {
        match part {
            AcpContentBlock::Text { text } => {
                blocks.push(json!({ "type": "text", "text": rewrite_mcp_prefix(text) }));
            }
            AcpContentBlock::ResourceLink { uri, .. } => {
                blocks.push(json!({ "type": "text", "text": link_text(uri) }));
            }
            AcpContentBlock::Resource { resource } => {
                if let Some(ref text) = resource.text {
                    blocks.push(json!({ "type": "text", "text": link_text(&resource.uri) }));
                    trailing_context.push(json!({
                        "type": "text",
                        "text": format!(
                            "\n<context ref=\"{}\">\n{}\n</context>",
                            resource.uri, text
                        ),
                    }));
                }
                // Blob resources are ignored.
            }
            AcpContentBlock::Image {
                data,
                mime_type,
                uri,
            } => {
                if let Some(block) = image_block(data.as_deref(), mime_type.as_deref(), uri.as_deref())
                {
                    blocks.push(block);
                }
            }
            // Audio and unknown chunk types are ignored.
            AcpContentBlock::Audio { .. } | AcpContentBlock::Other => {}
        }
    }

    blocks.extend(trailing_context);
    blocks
}

/// Extract the plain text of a prompt, for titling.
#[must_use]
pub fn prompt_text(parts: &[AcpContentBlock]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            AcpContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rewrite the `/mcp:<server>:<command> <args>` prefix to the agent's
/// `/<server>:<command> (MCP) <args>` form.
///
/// Inputs without the prefix pass through unchanged. With no trailing
/// arguments the rewrite carries no trailing space.
#[must_use]
pub fn rewrite_mcp_prefix(text: &str) -> String {
    let Some(rest) = text.strip_prefix("/mcp:") else {
        return text.to_owned();
    };

    let (command_part, args) = match rest.split_once(' ') {
        Some((head, tail)) => (head, Some(tail)),
        None => (rest, None),
    };

    let Some((server, command)) = command_part.split_once(':') else {
        return text.to_owned();
    };
    if server.is_empty() || command.is_empty() {
        return text.to_owned();
    }

    match args {
        Some(args) => format!("/{server}:{command} (MCP) {args}"),
        None => format!("/{server}:{command} (MCP)"),
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Markdown-style link text for a resource URI.
///
/// `file://` and `zed://` URIs render as `[@<basename>](<uri>)`; anything
/// else passes through verbatim.
fn link_text(uri: &str) -> String {
    if uri.starts_with("file://") || uri.starts_with("zed://") {
        let basename = uri
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(uri);
        format!("[@{basename}]({uri})")
    } else {
        uri.to_owned()
    }
}

/// Build an agent image block; base64 data wins over a URL.
fn image_block(data: Option<&str>, mime_type: Option<&str>, uri: Option<&str>) -> Option<Value> {
    if let Some(data) = data {
        return Some(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": mime_type.unwrap_or("image/png"),
                "data": data,
            },
        }));
    }
    if let Some(uri) = uri {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return Some(json!({
                "type": "image",
                "source": { "type": "url", "url": uri },
            }));
        }
    }
    None
}
