use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::{ProtocolVersion, Random};

/// Hello sent by both peers at the start of a handshake.
#[derive(Debug, PartialEq, Eq)]
pub struct Hello<'a> {
    pub version: ProtocolVersion,
    pub random: Random,
    pub cipher_suite: u16,
    /// X25519 public key share, opaque<1..255>.
    pub key_share: &'a [u8],
}

impl<'a> Hello<'a> {
    pub fn new(
        version: ProtocolVersion,
        random: Random,
        cipher_suite: u16,
        key_share: &'a [u8],
    ) -> Self {
        Hello {
            version,
            random,
            cipher_suite,
            key_share,
        }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Hello<'a>> {
        let (input, version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, cipher_suite) = be_u16(input)?;
        let (rest, len) = be_u8(input)?;
        if len == 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (rest, key_share) = take(len as usize)(rest)?;

        Ok((
            rest,
            Hello {
                version,
                random,
                cipher_suite,
                key_share,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.version.serialize(output);
        self.random.serialize(output);
        output.extend_from_slice(&self.cipher_suite.to_be_bytes());
        output.push(self.key_share.len() as u8);
        output.extend_from_slice(self.key_share);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_serialize() {
        let key_share = [5u8; 32];
        let hello = Hello::new(ProtocolVersion::V1_0, Random([1; 32]), 0x1301, &key_share);

        let mut out = Vec::new();
        hello.serialize(&mut out);
        assert_eq!(out.len(), 2 + 32 + 2 + 1 + 32);
        assert_eq!(&out[..2], &[0x01, 0x00]);

        let (rest, parsed) = Hello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, hello);
    }

    #[test]
    fn empty_key_share_is_rejected() {
        let mut out = Vec::new();
        Hello::new(ProtocolVersion::V1_0, Random([1; 32]), 0x1301, &[]).serialize(&mut out);
        assert!(Hello::parse(&out).is_err());
    }
}
