use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u24, be_u8};
use nom::{Err, IResult};

use super::{CertificateMsg, CertificateVerify, Finished, Hello};

/// msg_type(1) + length(3)
pub const HANDSHAKE_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    Certificate,
    CertificateVerify,
    Finished,
    Unknown(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => MessageType::Hello,
            11 => MessageType::Certificate,
            15 => MessageType::CertificateVerify,
            20 => MessageType::Finished,
            _ => MessageType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            MessageType::Hello => 1,
            MessageType::Certificate => 11,
            MessageType::CertificateVerify => 15,
            MessageType::Finished => 20,
            MessageType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], MessageType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Body<'a> {
    Hello(Hello<'a>),
    Certificate(CertificateMsg<'a>),
    CertificateVerify(CertificateVerify<'a>),
    Finished(Finished<'a>),
}

impl<'a> Body<'a> {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Body::Hello(_) => MessageType::Hello,
            Body::Certificate(_) => MessageType::Certificate,
            Body::CertificateVerify(_) => MessageType::CertificateVerify,
            Body::Finished(_) => MessageType::Finished,
        }
    }

    fn parse(input: &'a [u8], msg_type: MessageType) -> IResult<&'a [u8], Body<'a>> {
        match msg_type {
            MessageType::Hello => {
                let (input, hello) = Hello::parse(input)?;
                Ok((input, Body::Hello(hello)))
            }
            MessageType::Certificate => {
                let (input, cert) = CertificateMsg::parse(input)?;
                Ok((input, Body::Certificate(cert)))
            }
            MessageType::CertificateVerify => {
                let (input, cv) = CertificateVerify::parse(input)?;
                Ok((input, Body::CertificateVerify(cv)))
            }
            MessageType::Finished => {
                let (input, finished) = Finished::parse(input)?;
                Ok((input, Body::Finished(finished)))
            }
            MessageType::Unknown(_) => Err(Err::Failure(Error::new(input, ErrorKind::Tag))),
        }
    }

    fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            Body::Hello(v) => v.serialize(output),
            Body::Certificate(v) => v.serialize(output),
            Body::CertificateVerify(v) => v.serialize(output),
            Body::Finished(v) => v.serialize(output),
        }
    }
}

/// A complete handshake message.
#[derive(Debug, PartialEq, Eq)]
pub struct Handshake<'a> {
    pub body: Body<'a>,
}

impl<'a> Handshake<'a> {
    pub fn new(body: Body<'a>) -> Self {
        Handshake { body }
    }

    pub fn msg_type(&self) -> MessageType {
        self.body.msg_type()
    }

    /// Total length (header included) of the message at the start of
    /// `input`, once the header is available.
    pub fn frame_len(input: &[u8]) -> Option<usize> {
        if input.len() < HANDSHAKE_HEADER_LEN {
            return None;
        }
        let length = u32::from_be_bytes([0, input[1], input[2], input[3]]) as usize;
        Some(HANDSHAKE_HEADER_LEN + length)
    }

    /// Parse one message. The body must consume exactly the declared length.
    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Handshake<'a>> {
        let (input, msg_type) = MessageType::parse(input)?;
        let (input, length) = be_u24(input)?;
        let (rest, body_bytes) = take(length as usize)(input)?;

        let (trailing, body) = Body::parse(body_bytes, msg_type)?;
        if !trailing.is_empty() {
            return Err(Err::Failure(Error::new(trailing, ErrorKind::Eof)));
        }

        Ok((rest, Handshake { body }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let start = output.len();
        output.push(self.msg_type().as_u8());
        output.extend_from_slice(&[0, 0, 0]);
        self.body.serialize(output);

        let length = (output.len() - start - HANDSHAKE_HEADER_LEN) as u32;
        output[start + 1..start + 4].copy_from_slice(&length.to_be_bytes()[1..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing() {
        let verify_data = [3u8; 32];
        let msg = Handshake::new(Body::Finished(Finished::new(&verify_data)));

        let mut out = Vec::new();
        msg.serialize(&mut out);
        assert_eq!(&out[..4], &[20, 0, 0, 32]);
        assert_eq!(Handshake::frame_len(&out), Some(36));
        assert_eq!(Handshake::frame_len(&out[..3]), None);

        let (rest, parsed) = Handshake::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, msg);
    }

    #[test]
    fn trailing_body_bytes_are_rejected() {
        let mut out = vec![20, 0, 0, 33];
        out.extend_from_slice(&[0; 33]);
        assert!(Handshake::parse(&out).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(Handshake::parse(&[99, 0, 0, 0]).is_err());
    }
}
