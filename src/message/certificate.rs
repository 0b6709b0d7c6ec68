use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u24;
use nom::{Err, IResult};

/// Certificate handshake message carrying one DER certificate, opaque<1..2^24-1>.
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateMsg<'a> {
    pub cert_der: &'a [u8],
}

impl<'a> CertificateMsg<'a> {
    pub fn new(cert_der: &'a [u8]) -> Self {
        CertificateMsg { cert_der }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], CertificateMsg<'a>> {
        let (rest, len) = be_u24(input)?;
        if len == 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (rest, cert_der) = take(len as usize)(rest)?;
        Ok((rest, CertificateMsg { cert_der }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&(self.cert_der.len() as u32).to_be_bytes()[1..]);
        output.extend_from_slice(self.cert_der);
    }
}
