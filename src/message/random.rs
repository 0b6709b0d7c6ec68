use std::ops::Deref;

use nom::bytes::complete::take;
use nom::IResult;

use crate::rng::Entropy;
use crate::Error;

pub const RANDOM_LEN: usize = 32;

/// Per-handshake random value contributed by each peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; RANDOM_LEN]);

impl Random {
    pub fn new() -> Result<Self, Error> {
        let mut bytes = [0u8; RANDOM_LEN];
        Entropy::fill(&mut bytes)?;
        Ok(Random(bytes))
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, bytes) = take(RANDOM_LEN)(input)?;
        let mut random = [0u8; RANDOM_LEN];
        random.copy_from_slice(bytes);
        Ok((input, Random(random)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.0);
    }
}

impl Deref for Random {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_randoms_differ() {
        assert_ne!(Random::new().unwrap(), Random::new().unwrap());
    }

    #[test]
    fn parse_requires_full_length() {
        assert!(Random::parse(&[0; 31]).is_err());
        let (rest, r) = Random::parse(&[7; 33]).unwrap();
        assert_eq!(r, Random([7; RANDOM_LEN]));
        assert_eq!(rest, &[7]);
    }
}
