//! `arcplay://play?...` links that describe a single file.
//!
//! ```text
//! arcplay://play?identifier=gd77-05-08&name=d1t01.mp3&title=Minglewood&track=1
//! ```
//!
//! `identifier` and `name` are required; every other `ArchiveFile` field is
//! optional.

use crate::model::ArchiveFile;
use thiserror::Error;
use url::Url;

pub const SCHEME: &str = "arcplay";
const ACTION: &str = "play";

#[derive(Debug, Error, PartialEq)]
pub enum LinkError {
    #[error("not a link: {0}")]
    Malformed(#[from] url::ParseError),
    #[error("unsupported link '{0}'")]
    Unsupported(String),
    #[error("link is missing '{0}'")]
    MissingField(&'static str),
    #[error("link field '{field}' is not a number: {value}")]
    BadNumber { field: &'static str, value: String },
}

pub fn parse_link(link: &str) -> Result<ArchiveFile, LinkError> {
    let url = Url::parse(link.trim())?;
    if url.scheme() != SCHEME || url.host_str() != Some(ACTION) {
        return Err(LinkError::Unsupported(link.to_string()));
    }

    let mut file = ArchiveFile::default();
    for (key, value) in url.query_pairs() {
        let value = value.trim().to_string();
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "identifier" => file.identifier = value,
            "name" => file.name = value,
            "title" => file.title = Some(value),
            "artist" | "creator" => file.artist = Some(value),
            "format" => file.format = Some(value),
            "track" => file.track = Some(parse_number("track", &value)?),
            "size" => file.size = Some(parse_number("size", &value)?),
            "length" => file.length = Some(value),
            _ => {}
        }
    }

    if file.identifier.is_empty() {
        return Err(LinkError::MissingField("identifier"));
    }
    if file.name.is_empty() {
        return Err(LinkError::MissingField("name"));
    }
    Ok(file)
}

/// Build a shareable link for a file.  Local download state is not carried.
pub fn to_link(file: &ArchiveFile) -> String {
    let mut q = url::form_urlencoded::Serializer::new(String::new());
    q.append_pair("identifier", &file.identifier);
    q.append_pair("name", &file.name);
    if let Some(v) = &file.title {
        q.append_pair("title", v);
    }
    if let Some(v) = &file.artist {
        q.append_pair("artist", v);
    }
    if let Some(v) = &file.format {
        q.append_pair("format", v);
    }
    if let Some(v) = file.track {
        q.append_pair("track", &v.to_string());
    }
    if let Some(v) = file.size {
        q.append_pair("size", &v.to_string());
    }
    if let Some(v) = &file.length {
        q.append_pair("length", v);
    }
    format!("{}://{}?{}", SCHEME, ACTION, q.finish())
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, LinkError> {
    value.parse().map_err(|_| LinkError::BadNumber {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_link() {
        let file = parse_link(
            "arcplay://play?identifier=gd77&name=disc%201%2Ft01.mp3&title=Scarlet%20Begonias&artist=Grateful%20Dead&track=3&size=1024&length=10:30&format=VBR%20MP3",
        )
        .unwrap();
        assert_eq!(file.identifier, "gd77");
        assert_eq!(file.name, "disc 1/t01.mp3");
        assert_eq!(file.title.as_deref(), Some("Scarlet Begonias"));
        assert_eq!(file.artist.as_deref(), Some("Grateful Dead"));
        assert_eq!(file.track, Some(3));
        assert_eq!(file.size, Some(1024));
        assert_eq!(file.duration_secs(), Some(630.0));
        assert!(file.id.is_none());
        assert!(!file.is_local());
    }

    #[test]
    fn test_missing_name() {
        assert_eq!(
            parse_link("arcplay://play?identifier=x"),
            Err(LinkError::MissingField("name"))
        );
    }

    #[test]
    fn test_wrong_scheme_or_action() {
        assert!(matches!(
            parse_link("https://play?identifier=x&name=y"),
            Err(LinkError::Unsupported(_))
        ));
        assert!(matches!(
            parse_link("arcplay://queue?identifier=x&name=y"),
            Err(LinkError::Unsupported(_))
        ));
    }

    #[test]
    fn test_bad_track_number() {
        assert!(matches!(
            parse_link("arcplay://play?identifier=x&name=y&track=two"),
            Err(LinkError::BadNumber { field: "track", .. })
        ));
    }

    #[test]
    fn test_shared_link_parses_back() {
        let mut file = ArchiveFile::new("item", "a b.ogg");
        file.title = Some("A & B".into());
        file.track = Some(2);
        let parsed = parse_link(&to_link(&file)).unwrap();
        assert_eq!(parsed, file);
    }
}
