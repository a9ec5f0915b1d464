//! Typed attribute values (spec.md §9 REDESIGN FLAGS: "tagged union, not JSON").

/// RFC 8010 `dateTime` value, decoded bit-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub deci_seconds: u8,
    pub utc_dir: u8,
    pub utc_hours: u8,
    pub utc_mins: u8,
}

/// RFC 8010 `resolution` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub cross_feed: i32,
    pub feed: i32,
    pub units: i8,
}

/// One value of an [`crate::wire::Attribute`], tagged by its IPP value-tag family.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Integer(i32),
    Enum(i32),
    Boolean(bool),
    OctetString(Vec<u8>),
    DateTime(DateTime),
    Resolution(Resolution),
    RangeOfInteger { min: i32, max: i32 },
    TextWithLanguage { language: String, text: String },
    NameWithLanguage { language: String, name: String },
    TextWithoutLanguage(String),
    NameWithoutLanguage(String),
    Keyword(String),
    Uri(String),
    UriScheme(String),
    Charset(String),
    NaturalLanguage(String),
    MimeMediaType(String),
    /// A value whose tag this codec does not model. Round-trips opaquely
    /// (spec.md §4.1: "Unknown value-tags are passed through ... with tag
    /// preserved").
    Unknown { tag: u8, data: Vec<u8> },
}

const INTEGER: u8 = 0x21;
const BOOLEAN: u8 = 0x22;
const ENUM: u8 = 0x23;
const OCTET_STRING: u8 = 0x30;
const DATE_TIME: u8 = 0x31;
const RESOLUTION: u8 = 0x32;
const RANGE_OF_INTEGER: u8 = 0x33;
const TEXT_WITH_LANGUAGE: u8 = 0x35;
const NAME_WITH_LANGUAGE: u8 = 0x36;
const TEXT_WITHOUT_LANGUAGE: u8 = 0x41;
const NAME_WITHOUT_LANGUAGE: u8 = 0x42;
const KEYWORD: u8 = 0x44;
const URI: u8 = 0x45;
const URI_SCHEME: u8 = 0x46;
const CHARSET: u8 = 0x47;
const NATURAL_LANGUAGE: u8 = 0x48;
const MIME_MEDIA_TYPE: u8 = 0x49;

pub(super) fn tag_byte(value: &AttributeValue) -> u8 {
    match value {
        AttributeValue::Integer(_) => INTEGER,
        AttributeValue::Enum(_) => ENUM,
        AttributeValue::Boolean(_) => BOOLEAN,
        AttributeValue::OctetString(_) => OCTET_STRING,
        AttributeValue::DateTime(_) => DATE_TIME,
        AttributeValue::Resolution(_) => RESOLUTION,
        AttributeValue::RangeOfInteger { .. } => RANGE_OF_INTEGER,
        AttributeValue::TextWithLanguage { .. } => TEXT_WITH_LANGUAGE,
        AttributeValue::NameWithLanguage { .. } => NAME_WITH_LANGUAGE,
        AttributeValue::TextWithoutLanguage(_) => TEXT_WITHOUT_LANGUAGE,
        AttributeValue::NameWithoutLanguage(_) => NAME_WITHOUT_LANGUAGE,
        AttributeValue::Keyword(_) => KEYWORD,
        AttributeValue::Uri(_) => URI,
        AttributeValue::UriScheme(_) => URI_SCHEME,
        AttributeValue::Charset(_) => CHARSET,
        AttributeValue::NaturalLanguage(_) => NATURAL_LANGUAGE,
        AttributeValue::MimeMediaType(_) => MIME_MEDIA_TYPE,
        AttributeValue::Unknown { tag, .. } => *tag,
    }
}

fn len_prefixed_str(bytes: &[u8], at: &mut usize) -> String {
    let len = u16::from_be_bytes([bytes[*at], bytes[*at + 1]]) as usize;
    *at += 2;
    let s = String::from_utf8_lossy(&bytes[*at..*at + len]).into_owned();
    *at += len;
    s
}

pub(super) fn parse(tag: u8, data: &[u8]) -> AttributeValue {
    match tag {
        INTEGER => AttributeValue::Integer(be_i32(data)),
        ENUM => AttributeValue::Enum(be_i32(data)),
        BOOLEAN => AttributeValue::Boolean(data.first().copied().unwrap_or(0) != 0),
        OCTET_STRING => AttributeValue::OctetString(data.to_vec()),
        TEXT_WITHOUT_LANGUAGE => AttributeValue::TextWithoutLanguage(lossy(data)),
        NAME_WITHOUT_LANGUAGE => AttributeValue::NameWithoutLanguage(lossy(data)),
        KEYWORD => AttributeValue::Keyword(lossy(data)),
        URI => AttributeValue::Uri(lossy(data)),
        URI_SCHEME => AttributeValue::UriScheme(lossy(data)),
        CHARSET => AttributeValue::Charset(lossy(data)),
        NATURAL_LANGUAGE => AttributeValue::NaturalLanguage(lossy(data)),
        MIME_MEDIA_TYPE => AttributeValue::MimeMediaType(lossy(data)),
        TEXT_WITH_LANGUAGE => {
            let mut at = 0;
            let language = len_prefixed_str(data, &mut at);
            let text = len_prefixed_str(data, &mut at);
            AttributeValue::TextWithLanguage { language, text }
        }
        NAME_WITH_LANGUAGE => {
            let mut at = 0;
            let language = len_prefixed_str(data, &mut at);
            let name = len_prefixed_str(data, &mut at);
            AttributeValue::NameWithLanguage { language, name }
        }
        RANGE_OF_INTEGER => AttributeValue::RangeOfInteger {
            min: be_i32(&data[0..4]),
            max: be_i32(&data[4..8]),
        },
        RESOLUTION => AttributeValue::Resolution(Resolution {
            cross_feed: be_i32(&data[0..4]),
            feed: be_i32(&data[4..8]),
            units: data[8] as i8,
        }),
        DATE_TIME => AttributeValue::DateTime(DateTime {
            year: u16::from_be_bytes([data[0], data[1]]),
            month: data[2],
            day: data[3],
            hour: data[4],
            minutes: data[5],
            seconds: data[6],
            deci_seconds: data[7],
            utc_dir: data[8],
            utc_hours: data[9],
            utc_mins: data[10],
        }),
        other => AttributeValue::Unknown {
            tag: other,
            data: data.to_vec(),
        },
    }
}

pub(super) fn encode(value: &AttributeValue) -> Vec<u8> {
    match value {
        AttributeValue::Integer(i) | AttributeValue::Enum(i) => i.to_be_bytes().to_vec(),
        AttributeValue::Boolean(b) => vec![*b as u8],
        AttributeValue::OctetString(bytes) | AttributeValue::Unknown { data: bytes, .. } => bytes.clone(),
        AttributeValue::TextWithoutLanguage(s)
        | AttributeValue::NameWithoutLanguage(s)
        | AttributeValue::Keyword(s)
        | AttributeValue::Uri(s)
        | AttributeValue::UriScheme(s)
        | AttributeValue::Charset(s)
        | AttributeValue::NaturalLanguage(s)
        | AttributeValue::MimeMediaType(s) => s.as_bytes().to_vec(),
        AttributeValue::TextWithLanguage { language, text } => {
            let mut out = Vec::new();
            out.extend_from_slice(&(language.len() as u16).to_be_bytes());
            out.extend_from_slice(language.as_bytes());
            out.extend_from_slice(&(text.len() as u16).to_be_bytes());
            out.extend_from_slice(text.as_bytes());
            out
        }
        AttributeValue::NameWithLanguage { language, name } => {
            let mut out = Vec::new();
            out.extend_from_slice(&(language.len() as u16).to_be_bytes());
            out.extend_from_slice(language.as_bytes());
            out.extend_from_slice(&(name.len() as u16).to_be_bytes());
            out.extend_from_slice(name.as_bytes());
            out
        }
        AttributeValue::RangeOfInteger { min, max } => {
            let mut out = Vec::with_capacity(8);
            out.extend_from_slice(&min.to_be_bytes());
            out.extend_from_slice(&max.to_be_bytes());
            out
        }
        AttributeValue::Resolution(Resolution { cross_feed, feed, units }) => {
            let mut out = Vec::with_capacity(9);
            out.extend_from_slice(&cross_feed.to_be_bytes());
            out.extend_from_slice(&feed.to_be_bytes());
            out.push(*units as u8);
            out
        }
        AttributeValue::DateTime(dt) => vec![
            (dt.year >> 8) as u8,
            (dt.year & 0xff) as u8,
            dt.month,
            dt.day,
            dt.hour,
            dt.minutes,
            dt.seconds,
            dt.deci_seconds,
            dt.utc_dir,
            dt.utc_hours,
            dt.utc_mins,
        ],
    }
}

fn be_i32(data: &[u8]) -> i32 {
    i32::from_be_bytes([
        data.first().copied().unwrap_or(0),
        data.get(1).copied().unwrap_or(0),
        data.get(2).copied().unwrap_or(0),
        data.get(3).copied().unwrap_or(0),
    ])
}

fn lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
