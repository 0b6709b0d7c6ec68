use nom::bytes::complete::take;
use nom::IResult;

use crate::crypto::prf::VERIFY_DATA_LEN;

#[derive(Debug, PartialEq, Eq)]
pub struct Finished<'a> {
    pub verify_data: &'a [u8],
}

impl<'a> Finished<'a> {
    pub fn new(verify_data: &'a [u8]) -> Self {
        Finished { verify_data }
    }

    pub fn parse(input: &'a [u8]) -> IResult<&'a [u8], Finished<'a>> {
        let (input, verify_data) = take(VERIFY_DATA_LEN)(input)?;
        Ok((input, Finished { verify_data }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(self.verify_data);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_length() {
        let data = [9u8; VERIFY_DATA_LEN + 1];
        let (rest, finished) = Finished::parse(&data).unwrap();
        assert_eq!(finished.verify_data.len(), VERIFY_DATA_LEN);
        assert_eq!(rest, &[9]);

        assert!(Finished::parse(&data[..VERIFY_DATA_LEN - 1]).is_err());
    }
}
