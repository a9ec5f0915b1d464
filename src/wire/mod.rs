//! Binary IPP/1.1 wire framing (RFC 8010 subset).
//!
//! Decodes and encodes the attribute-group structure of an IPP packet:
//! version, operation-or-status code, request-id, and the ordered
//! sequence of delimited attribute groups that follow. Document bytes
//! that trail the `end-of-attributes-tag` are not part of this codec;
//! see [`crate::document`].

mod value;

pub use value::{AttributeValue, DateTime, Resolution};

use thiserror::Error;

/// IPP protocol version. This crate only ever emits `1.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IppVersion(pub u8, pub u8);

impl IppVersion {
    pub const V1_1: IppVersion = IppVersion(1, 1);
}

impl Default for IppVersion {
    fn default() -> Self {
        Self::V1_1
    }
}

/// IPP response status codes used by this service (spec.md §4.5 "Error-signalling policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    SuccessfulOk,
    ClientErrorBadRequest,
    ClientErrorNotPossible,
    ClientErrorDocumentFormatNotSupported,
    ServerErrorInternalError,
    ServerErrorOperationNotSupported,
}

impl StatusCode {
    pub fn code(self) -> u16 {
        match self {
            StatusCode::SuccessfulOk => 0x0000,
            StatusCode::ClientErrorBadRequest => 0x0400,
            StatusCode::ClientErrorNotPossible => 0x0403,
            StatusCode::ClientErrorDocumentFormatNotSupported => 0x040A,
            StatusCode::ServerErrorInternalError => 0x0500,
            StatusCode::ServerErrorOperationNotSupported => 0x0501,
        }
    }
}

/// Operation ids dispatched by the Handler (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    PrintJob,
    PrintUri,
    ValidateJob,
    CreateJob,
    SendDocument,
    SendUri,
    CancelJob,
    GetJobAttributes,
    GetJobs,
    GetPrinterAttributes,
    HoldJob,
    ReleaseJob,
    RestartJob,
    PausePrinter,
    ResumePrinter,
    PurgeJobs,
    Other(u16),
}

impl Operation {
    pub fn from_u16(v: u16) -> Operation {
        match v {
            0x0002 => Operation::PrintJob,
            0x0003 => Operation::PrintUri,
            0x0004 => Operation::ValidateJob,
            0x0005 => Operation::CreateJob,
            0x0006 => Operation::SendDocument,
            0x0007 => Operation::SendUri,
            0x0008 => Operation::CancelJob,
            0x0009 => Operation::GetJobAttributes,
            0x000A => Operation::GetJobs,
            0x000B => Operation::GetPrinterAttributes,
            0x000C => Operation::HoldJob,
            0x000D => Operation::ReleaseJob,
            0x000E => Operation::RestartJob,
            0x0010 => Operation::PausePrinter,
            0x0011 => Operation::ResumePrinter,
            0x0012 => Operation::PurgeJobs,
            other => Operation::Other(other),
        }
    }
}

/// The delimiter tag that opens an attribute group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelimiterTag {
    Operation,
    Job,
    Printer,
    Unsupported,
    Subscription,
    EventNotification,
}

impl DelimiterTag {
    const OPERATION: u8 = 0x01;
    const JOB: u8 = 0x02;
    const END_OF_ATTRIBUTES: u8 = 0x03;
    const PRINTER: u8 = 0x04;
    const UNSUPPORTED: u8 = 0x05;
    const SUBSCRIPTION: u8 = 0x06;
    const EVENT_NOTIFICATION: u8 = 0x07;

    fn from_byte(b: u8) -> Option<DelimiterTag> {
        match b {
            Self::OPERATION => Some(DelimiterTag::Operation),
            Self::JOB => Some(DelimiterTag::Job),
            Self::PRINTER => Some(DelimiterTag::Printer),
            Self::UNSUPPORTED => Some(DelimiterTag::Unsupported),
            Self::SUBSCRIPTION => Some(DelimiterTag::Subscription),
            Self::EVENT_NOTIFICATION => Some(DelimiterTag::EventNotification),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            DelimiterTag::Operation => Self::OPERATION,
            DelimiterTag::Job => Self::JOB,
            DelimiterTag::Printer => Self::PRINTER,
            DelimiterTag::Unsupported => Self::UNSUPPORTED,
            DelimiterTag::Subscription => Self::SUBSCRIPTION,
            DelimiterTag::EventNotification => Self::EVENT_NOTIFICATION,
        }
    }
}

/// A single named, typed attribute. Holds at least one value (spec.md §3 invariant).
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    values: Vec<AttributeValue>,
}

impl Attribute {
    /// Build an attribute with a single value.
    pub fn new(name: impl Into<String>, value: AttributeValue) -> Attribute {
        Attribute {
            name: name.into(),
            values: vec![value],
        }
    }

    /// Build a multi-valued attribute. Fails if `values` is empty.
    pub fn new_multi(
        name: impl Into<String>,
        values: Vec<AttributeValue>,
    ) -> Result<Attribute, WireError> {
        if values.is_empty() {
            return Err(WireError::EmptyAttribute);
        }
        Ok(Attribute {
            name: name.into(),
            values,
        })
    }

    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }

    pub fn first_value(&self) -> &AttributeValue {
        &self.values[0]
    }
}

/// A delimited, logically-scoped run of attributes (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeGroup {
    pub tag: DelimiterTag,
    pub attributes: Vec<Attribute>,
}

impl AttributeGroup {
    pub fn new(tag: DelimiterTag) -> AttributeGroup {
        AttributeGroup {
            tag,
            attributes: Vec::new(),
        }
    }

    pub fn push(&mut self, attribute: Attribute) -> &mut Self {
        self.attributes.push(attribute);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// A fully decoded (or to-be-encoded) IPP packet (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct IppPacket {
    pub version: IppVersion,
    pub operation_or_status: u16,
    pub request_id: u32,
    pub groups: Vec<AttributeGroup>,
}

impl IppPacket {
    pub fn new_request(operation: Operation, request_id: u32) -> IppPacket {
        let op_code = match operation {
            Operation::PrintJob => 0x0002,
            Operation::PrintUri => 0x0003,
            Operation::ValidateJob => 0x0004,
            Operation::CreateJob => 0x0005,
            Operation::SendDocument => 0x0006,
            Operation::SendUri => 0x0007,
            Operation::CancelJob => 0x0008,
            Operation::GetJobAttributes => 0x0009,
            Operation::GetJobs => 0x000A,
            Operation::GetPrinterAttributes => 0x000B,
            Operation::HoldJob => 0x000C,
            Operation::ReleaseJob => 0x000D,
            Operation::RestartJob => 0x000E,
            Operation::PausePrinter => 0x0010,
            Operation::ResumePrinter => 0x0011,
            Operation::PurgeJobs => 0x0012,
            Operation::Other(v) => v,
        };
        IppPacket {
            version: IppVersion::V1_1,
            operation_or_status: op_code,
            request_id,
            groups: Vec::new(),
        }
    }

    pub fn new_response(status: StatusCode, request_id: u32) -> IppPacket {
        IppPacket {
            version: IppVersion::V1_1,
            operation_or_status: status.code(),
            request_id,
            groups: Vec::new(),
        }
    }

    /// Groups tagged `Operation`, in encounter order.
    pub fn operation_groups(&self) -> impl Iterator<Item = &AttributeGroup> {
        self.groups.iter().filter(|g| g.tag == DelimiterTag::Operation)
    }

    pub fn find_operation_attribute(&self, name: &str) -> Option<&Attribute> {
        self.operation_groups().find_map(|g| g.get(name))
    }

    pub fn push_group(&mut self, group: AttributeGroup) -> &mut Self {
        self.groups.push(group);
        self
    }
}

/// Failure modes of the decoder (spec.md §4.1 "Failure modes").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated IPP packet: length field runs past end of buffer")]
    TruncatedInput,
    #[error("invalid delimiter tag 0x{0:02x} encountered mid-attribute")]
    InvalidTag(u8),
    #[error("request-id must be non-zero")]
    InvalidRequestId,
    #[error("attribute must carry at least one value")]
    EmptyAttribute,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        let b = *self.buf.get(self.pos).ok_or(WireError::TruncatedInput)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let hi = self.u8()? as u16;
        let lo = self.u8()? as u16;
        Ok((hi << 8) | lo)
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        let hi = self.u16()? as u32;
        let lo = self.u16()? as u32;
        Ok((hi << 16) | lo)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::TruncatedInput)?;
        let slice = self.buf.get(self.pos..end).ok_or(WireError::TruncatedInput)?;
        self.pos = end;
        Ok(slice)
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }
}

/// Decode the version/operation/request-id/attribute-group prefix of an
/// IPP packet. Bytes after `end-of-attributes-tag` (the document, if
/// any) are left untouched for [`crate::document::extract_document`].
pub fn decode(buf: &[u8]) -> Result<IppPacket, WireError> {
    let mut r = Reader::new(buf);
    let major = r.u8()?;
    let minor = r.u8()?;
    let operation_or_status = r.u16()?;
    let request_id = r.u32()?;
    if request_id == 0 {
        return Err(WireError::InvalidRequestId);
    }

    let mut groups: Vec<AttributeGroup> = Vec::new();
    loop {
        let tag = r.u8()?;
        if tag == DelimiterTag::END_OF_ATTRIBUTES {
            break;
        }
        if let Some(delim) = DelimiterTag::from_byte(tag) {
            groups.push(AttributeGroup::new(delim));
            continue;
        }
        // Not a delimiter tag: this is a value-tag opening an attribute
        // within the current group.
        let group = groups.last_mut().ok_or(WireError::InvalidTag(tag))?;
        let name_len = r.u16()? as usize;
        let name = String::from_utf8_lossy(r.bytes(name_len)?).into_owned();
        let value_len = r.u16()? as usize;
        let value_bytes = r.bytes(value_len)?;
        let value = value::parse(tag, value_bytes);
        if name.is_empty() {
            // Additional value for the previous attribute.
            let last = group.attributes.last_mut().ok_or(WireError::InvalidTag(tag))?;
            last.values.push(value);
        } else {
            group.attributes.push(Attribute {
                name,
                values: vec![value],
            });
        }
    }

    Ok(IppPacket {
        version: IppVersion(major, minor),
        operation_or_status,
        request_id,
        groups,
    })
}

/// Encode a packet to its byte-identical wire representation. Never
/// reorders attributes or groups (spec.md §4.1 encoder contract).
pub fn encode(packet: &IppPacket) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(packet.version.0);
    out.push(packet.version.1);
    out.extend_from_slice(&packet.operation_or_status.to_be_bytes());
    out.extend_from_slice(&packet.request_id.to_be_bytes());

    for group in &packet.groups {
        out.push(group.tag.to_byte());
        for attr in &group.attributes {
            for (i, value) in attr.values.iter().enumerate() {
                out.push(value::tag_byte(value));
                if i == 0 {
                    out.extend_from_slice(&(attr.name.len() as u16).to_be_bytes());
                    out.extend_from_slice(attr.name.as_bytes());
                } else {
                    out.extend_from_slice(&0u16.to_be_bytes());
                }
                let encoded = value::encode(value);
                out.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
                out.extend_from_slice(&encoded);
            }
        }
    }
    out.push(DelimiterTag::END_OF_ATTRIBUTES);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> IppPacket {
        let mut packet = IppPacket::new_request(Operation::GetPrinterAttributes, 0x0000_0042);
        let mut op_group = AttributeGroup::new(DelimiterTag::Operation);
        op_group.push(Attribute::new(
            "attributes-charset",
            AttributeValue::Charset("utf-8".into()),
        ));
        op_group.push(Attribute::new(
            "attributes-natural-language",
            AttributeValue::NaturalLanguage("en".into()),
        ));
        op_group.push(
            Attribute::new_multi(
                "requested-attributes",
                vec![
                    AttributeValue::Keyword("printer-name".into()),
                    AttributeValue::Keyword("printer-state".into()),
                ],
            )
            .unwrap(),
        );
        packet.push_group(op_group);
        packet
    }

    #[test]
    fn round_trips_attribute_order_and_values() {
        let packet = sample_packet();
        let encoded = encode(&packet);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn request_id_is_preserved_through_round_trip() {
        let packet = sample_packet();
        let decoded = decode(&encode(&packet)).unwrap();
        assert_eq!(decoded.request_id, packet.request_id);
    }

    #[test]
    fn zero_length_buffer_is_truncated() {
        assert_eq!(decode(&[]), Err(WireError::TruncatedInput));
    }

    #[test]
    fn zero_request_id_is_rejected() {
        let mut buf = vec![1, 1, 0, 0x0B, 0, 0, 0, 0];
        buf.push(DelimiterTag::END_OF_ATTRIBUTES);
        assert_eq!(decode(&buf), Err(WireError::InvalidRequestId));
    }

    #[test]
    fn truncated_length_field_is_rejected() {
        // Declares a 10-byte name but supplies none.
        let buf = vec![1, 1, 0, 0x0B, 0, 0, 0, 1, DelimiterTag::OPERATION, 0x44, 0, 10];
        let err = decode(&buf).unwrap_err();
        assert_eq!(err, WireError::TruncatedInput);
    }

    #[test]
    fn value_tag_before_any_group_is_invalid() {
        let buf = vec![1, 1, 0, 0x0B, 0, 0, 0, 1, 0x44, 0, 0, 0, 0];
        assert_eq!(decode(&buf), Err(WireError::InvalidTag(0x44)));
    }

    #[test]
    fn unknown_value_tag_round_trips_as_opaque() {
        let mut packet = IppPacket::new_response(StatusCode::SuccessfulOk, 1);
        let mut group = AttributeGroup::new(DelimiterTag::Operation);
        group.push(Attribute::new(
            "vendor-extension",
            AttributeValue::Unknown {
                tag: 0x7f,
                data: vec![1, 2, 3],
            },
        ));
        packet.push_group(group);
        let decoded = decode(&encode(&packet)).unwrap();
        assert_eq!(decoded, packet);
    }
}
