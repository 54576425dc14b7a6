//! Artist credits parsed from the artist tag and the track title.

use coral_model::{ArtistRole, UNKNOWN_ARTIST};
use once_cell::sync::Lazy;
use regex::Regex;

static FEATURING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\([f](?:ea)?t(?:uring)?\.? (.*?)\)").expect("featuring regex should compile")
});

static REMIXER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\(([^()]*)(?: Edit| Remix| VIP| Bootleg)\)|\[([^\[\]]*)(?: Edit| Remix| VIP| Bootleg)\]",
    )
    .expect("remixer regex should compile")
});

static SEPARATOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",|&|;| x ").expect("artist separator regex should compile"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedArtist {
    pub name: String,
    pub role: ArtistRole,
}

/// Split a credit string on `,` `&` `;` and ` x `, trimming and dropping
/// empty or repeated names. A credit with no names at all becomes
/// [`UNKNOWN_ARTIST`].
pub fn split_artists(credit: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in SEPARATOR_PATTERN.split(credit).map(str::trim) {
        if !name.is_empty() && !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    if names.is_empty() {
        names.push(UNKNOWN_ARTIST.to_string());
    }
    names
}

fn featuring(title: &str) -> Option<&str> {
    FEATURING_PATTERN
        .captures(title)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().trim())
        .filter(|found| !found.is_empty())
}

fn remixers(title: &str) -> Option<&str> {
    let captures = REMIXER_PATTERN.captures(title)?;
    captures
        .get(2)
        .or_else(|| captures.get(1))
        .map(|found| found.as_str().trim())
        .filter(|found| !found.is_empty())
}

/// Every credited artist of a track: guests from `(feat. ...)`, main artists
/// from the artist tag, and remixers from `(... Remix)`-style suffixes, in
/// that order.
pub fn parse_artists(artist: Option<&str>, title: &str) -> Vec<ParsedArtist> {
    let with_role = |names: Vec<String>, role: ArtistRole| {
        names
            .into_iter()
            .map(move |name| ParsedArtist { name, role })
    };

    let guests = featuring(title).map(split_artists).unwrap_or_default();
    let main = split_artists(artist.unwrap_or_default());
    let remixed = remixers(title).map(split_artists).unwrap_or_default();

    with_role(guests, ArtistRole::Guest)
        .chain(with_role(main, ArtistRole::Main))
        .chain(with_role(remixed, ArtistRole::Remixer))
        .collect()
}
