use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u64, be_u8};
use nom::IResult;

/// content_type(1) + version(2) + sequence(8) + length(2)
pub const RECORD_HEADER_LEN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1_0,
    Unknown(u16),
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0100 => ProtocolVersion::V1_0,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::V1_0 => 0x0100,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: u64,
    pub length: u16,
}

impl RecordHeader {
    pub fn parse(input: &[u8]) -> IResult<&[u8], RecordHeader> {
        let (input, content_type) = ContentType::parse(input)?;
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, sequence) = be_u64(input)?;
        let (input, length) = be_u16(input)?;

        Ok((
            input,
            RecordHeader {
                content_type,
                version,
                sequence,
                length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.content_type.as_u8());
        self.version.serialize(output);
        output.extend_from_slice(&self.sequence.to_be_bytes());
        output.extend_from_slice(&self.length.to_be_bytes());
    }
}

/// One record on the wire. The fragment is plaintext for handshake traffic and
/// ciphertext plus tag once a session is established.
#[derive(Debug, PartialEq, Eq)]
pub struct Record<'a> {
    pub header: RecordHeader,
    pub fragment: &'a [u8],
}

impl<'a> Record<'a> {
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Record<'a>> {
        let (input, header) = RecordHeader::parse(input)?;
        let (input, fragment) = take(header.length as usize)(input)?;
        Ok((input, Record { header, fragment }))
    }

    /// Total length of the record at the start of `input`, once its header is
    /// available. The record itself may not have fully arrived.
    pub fn frame_len(input: &[u8]) -> Option<usize> {
        if input.len() < RECORD_HEADER_LEN {
            return None;
        }
        let length = u16::from_be_bytes([input[11], input[12]]) as usize;
        Some(RECORD_HEADER_LEN + length)
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.header.serialize(output);
        output.extend_from_slice(self.fragment);
    }
}
