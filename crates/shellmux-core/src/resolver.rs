//! Generic identifier resolution.
//!
//! Commands reference sessions, screens, lines and remotes by id, name,
//! numeric position, or a position relative to the current item. All of
//! those entities are flattened into [`ResolveItem`]s and resolved here.
//!
//! Resolution order:
//! 1. position grammar (`+`, `-`, `S`, `E`, `S+k`, `E-k`, `+k`, `-k`, `k`)
//! 2. exact id (full uuid)
//! 3. partial id (8 lowercase hex chars, prefix match)
//! 4. exact name
//! 5. unique name prefix among visible items
//!
//! A name that looks like a position is shadowed by the position grammar.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

static POSITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^((S?\+|E?-)?[0-9]+|(\+|-|S|E))$").expect("position regex is valid")
});

static PARTIAL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{8}$").expect("partial id regex is valid"));

/// Uniform view of an addressable entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveItem {
    /// Stable identifier (usually a uuid string).
    pub id: String,
    /// Optional display name.
    pub name: String,
    /// 1-based stable position, only meaningful for numeric resolution.
    pub num: i64,
    /// Hidden items are skipped by positional and prefix resolution.
    pub hidden: bool,
}

impl ResolveItem {
    /// Create a visible named item.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            num: 0,
            hidden: false,
        }
    }

    /// Set the stable number.
    #[must_use]
    pub const fn with_num(mut self, num: i64) -> Self {
        self.num = num;
        self
    }

    /// Set the hidden flag.
    #[must_use]
    pub const fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }
}

/// Resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("could not resolve {kind} '{arg}' (name/id/pos not found)")]
    NotFound { kind: String, arg: String },
    #[error(
        "could not resolve {kind} '{arg}', ambiguous prefix matched multiple {kind}s: {}",
        format_strs(.candidates, "and", true)
    )]
    Ambiguous {
        kind: String,
        arg: String,
        candidates: Vec<String>,
    },
}

/// Parsed position argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// `+` / `-`: step from the current item, wrapping at the ends.
    Step(i64),
    /// `+k` / `-k`: offset from the current item, clamped.
    Relative(i64),
    /// `S`, `S+k`: offset from the first visible item, clamped.
    FromStart(i64),
    /// `E`, `E-k`: offset back from the last visible item, clamped.
    FromEnd(i64),
    /// `k`: absolute position.
    Absolute(i64),
}

/// Whether `arg` matches the position grammar.
#[must_use]
pub fn is_position_arg(arg: &str) -> bool {
    POSITION_RE.is_match(arg)
}

fn parse_position(arg: &str) -> Option<Position> {
    if !is_position_arg(arg) {
        return None;
    }
    let num = |s: &str| s.parse::<i64>().ok();
    let pos = match arg {
        "+" => Position::Step(1),
        "-" => Position::Step(-1),
        "S" => Position::FromStart(0),
        "E" => Position::FromEnd(0),
        _ if arg.starts_with("S+") => Position::FromStart(num(&arg[2..])?),
        _ if arg.starts_with("E-") => Position::FromEnd(num(&arg[2..])?),
        _ if arg.starts_with('+') || arg.starts_with('-') => Position::Relative(num(arg)?),
        _ => Position::Absolute(num(arg)?),
    };
    Some(pos)
}

/// Clamp or wrap a 1-based index into `[1, max]`.
const fn bound_index(idx: i64, max: i64, wrap: bool) -> i64 {
    if idx < 1 {
        if wrap { max } else { 1 }
    } else if idx > max {
        if wrap { 1 } else { max }
    } else {
        idx
    }
}

fn resolve_by_position<'a>(
    arg: &str,
    cur_id: Option<&str>,
    items: &'a [ResolveItem],
    is_numeric: bool,
) -> Option<&'a ResolveItem> {
    let pos = parse_position(arg)?;
    let visible: Vec<&ResolveItem> = items.iter().filter(|item| !item.hidden).collect();

    if let (Position::Absolute(num), true) = (pos, is_numeric) {
        // Numbered items keep their number even when hidden, so match over all of them.
        return items.iter().find(|item| item.num == num);
    }
    if visible.is_empty() {
        return None;
    }

    let max = i64::try_from(visible.len()).ok()?;
    let current = || {
        cur_id
            .and_then(|id| visible.iter().position(|item| item.id == id))
            .and_then(|idx| i64::try_from(idx + 1).ok())
            .unwrap_or(1)
    };
    let final_pos = match pos {
        Position::Step(delta) => bound_index(current().saturating_add(delta), max, true),
        Position::Relative(delta) => bound_index(current().saturating_add(delta), max, false),
        Position::FromStart(offset) => bound_index(1i64.saturating_add(offset), max, false),
        Position::FromEnd(offset) => bound_index(max.saturating_sub(offset), max, false),
        Position::Absolute(num) => bound_index(num, max, false),
    };
    let idx = usize::try_from(final_pos - 1).ok()?;
    visible.get(idx).copied()
}

fn is_partial_id(arg: &str) -> bool {
    PARTIAL_ID_RE.is_match(arg)
}

fn is_full_id(arg: &str) -> bool {
    Uuid::parse_str(arg).is_ok()
}

/// Resolve `arg` against `items`.
///
/// `cur_arg` names the current item (itself resolved with this function) and
/// anchors relative positions. `is_numeric` switches absolute positions to
/// match each item's stable `num` instead of its visible index. `kind` labels
/// the entity type in error messages.
///
/// Returns `Ok(None)` when there is nothing to resolve (no items or empty arg).
///
/// # Errors
/// Returns [`ResolveError::Ambiguous`] if a name prefix matches several visible
/// items, and [`ResolveError::NotFound`] if nothing matches.
pub fn resolve<'a>(
    arg: &str,
    cur_arg: &str,
    items: &'a [ResolveItem],
    is_numeric: bool,
    kind: &str,
) -> Result<Option<&'a ResolveItem>, ResolveError> {
    if items.is_empty() || arg.is_empty() {
        return Ok(None);
    }

    let cur_id = if cur_arg.is_empty() {
        None
    } else {
        resolve(cur_arg, "", items, is_numeric, kind)
            .ok()
            .flatten()
            .map(|item| item.id.as_str())
    };

    if let Some(item) = resolve_by_position(arg, cur_id, items, is_numeric) {
        return Ok(Some(item));
    }

    if is_full_id(arg) {
        if let Some(item) = items.iter().find(|item| item.id == arg) {
            return Ok(Some(item));
        }
    }

    if is_partial_id(arg) {
        if let Some(item) = items.iter().find(|item| item.id.starts_with(arg)) {
            return Ok(Some(item));
        }
    }

    if let Some(item) = items.iter().find(|item| !item.name.is_empty() && item.name == arg) {
        return Ok(Some(item));
    }

    let prefix_matches: Vec<&ResolveItem> = items
        .iter()
        .filter(|item| !item.hidden && !item.name.is_empty() && item.name.starts_with(arg))
        .collect();
    match prefix_matches.as_slice() {
        [] => Err(ResolveError::NotFound {
            kind: kind.to_string(),
            arg: arg.to_string(),
        }),
        [only] => Ok(Some(*only)),
        many => Err(ResolveError::Ambiguous {
            kind: kind.to_string(),
            arg: arg.to_string(),
            candidates: many.iter().map(|item| item.name.clone()).collect(),
        }),
    }
}

fn maybe_quote(s: &str, quote: bool) -> String {
    if quote { format!("'{s}'") } else { s.to_string() }
}

/// Render a list for humans: `a`, `a and b`, `a, b, and c`.
#[must_use]
pub fn format_strs(strs: &[String], conj: &str, quote: bool) -> String {
    match strs {
        [] => "(none)".to_string(),
        [one] => maybe_quote(one, quote),
        [a, b] => format!("{} {conj} {}", maybe_quote(a, quote), maybe_quote(b, quote)),
        [init @ .., last] => {
            let head: Vec<String> = init.iter().map(|s| maybe_quote(s, quote)).collect();
            format!("{}, {conj} {}", head.join(", "), maybe_quote(last, quote))
        }
    }
}
