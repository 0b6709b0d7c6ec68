use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

/// Signature over the handshake transcript made with the certificate key.
#[derive(Debug, PartialEq, Eq)]
pub struct CertificateVerify<'a> {
    pub scheme: u16,
    pub signature: &'a [u8],
}

impl<'a> CertificateVerify<'a> {
    pub fn new(scheme: u16, signature: &'a [u8]) -> Self {
        CertificateVerify { scheme, signature }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], CertificateVerify<'a>> {
        let (input, scheme) = be_u16(input)?;
        let (input, len) = be_u16(input)?;
        let (input, signature) = take(len as usize)(input)?;
        Ok((input, CertificateVerify { scheme, signature }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.scheme.to_be_bytes());
        output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        output.extend_from_slice(self.signature);
    }
}
