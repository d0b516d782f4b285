//! Chat address normalization. Pure functions, no I/O.
//!
//! The protocol addresses the same contact in several forms (`user@s.whatsapp.net`,
//! `user@c.us`, `user@lid`, `user:3@s.whatsapp.net`, `+user`). Everything that keys
//! storage by chat (history rows, profiles, sink files, envelope `chat_id`) goes
//! through [`canonical_chat_id`] so one human contact always maps to one key.

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const LINKED_SERVER: &str = "lid";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Kind of conversation an address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Direct,
    Group,
    Status,
    Broadcast,
}

/// Maps any addressing form to its stable storage key.
///
/// Empty (or whitespace-only) input stays empty.
pub fn canonical_chat_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered == STATUS_BROADCAST {
        return lowered;
    }

    let (user, server) = match lowered.split_once('@') {
        Some((u, s)) => (u, s),
        None => (lowered.as_str(), USER_SERVER),
    };

    let server = match server {
        LEGACY_USER_SERVER | LINKED_SERVER | "" => USER_SERVER,
        other => other,
    };

    let user = if server == USER_SERVER {
        strip_device(user.trim_start_matches('+'))
    } else {
        user
    };

    format!("{}@{}", user, server)
}

/// Drops the `:device` and `.agent` suffixes of a user part (`123.0:7` -> `123`).
fn strip_device(user: &str) -> &str {
    let user = user.split(':').next().unwrap_or(user);
    user.split('.').next().unwrap_or(user)
}

/// User part of an address (`123@s.whatsapp.net` -> `123`).
pub fn user_part(id: &str) -> &str {
    id.split('@').next().unwrap_or(id)
}

pub fn chat_kind(id: &str) -> ChatKind {
    let canon = canonical_chat_id(id);
    if canon == STATUS_BROADCAST {
        return ChatKind::Status;
    }
    match canon.rsplit_once('@').map(|(_, s)| s) {
        Some(GROUP_SERVER) => ChatKind::Group,
        Some(BROADCAST_SERVER) => ChatKind::Broadcast,
        _ => ChatKind::Direct,
    }
}

pub fn is_group(id: &str) -> bool {
    chat_kind(id) == ChatKind::Group
}

/// Keeps `[A-Za-z0-9._-]`, replaces anything else with `_`. Empty input becomes `unknown`.
pub fn sanitize_path_part(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
