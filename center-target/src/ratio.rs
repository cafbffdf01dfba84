use crate::common::*;

/// A finite value in `[0, 1]`, used for probabilities and overlap thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Ratio(R64);

impl Ratio {
    pub fn to_r64(&self) -> R64 {
        self.0
    }

    pub fn to_f64(&self) -> f64 {
        self.0.raw()
    }
}

impl Serialize for Ratio {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        Self::try_from(value).map_err(|err| D::Error::custom(format!("{:?}", err)))
    }
}

impl TryFrom<f64> for Ratio {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        ensure!(
            value.is_finite() && (0.0..=1.0).contains(&value),
            "ratio value must be within range [0.0, 1.0], but get {}",
            value
        );
        Ok(Self(r64(value)))
    }
}

impl From<Ratio> for f64 {
    fn from(from: Ratio) -> Self {
        from.0.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn ratio_range() {
        assert!(Ratio::try_from(-0.1).is_err());
        assert!(Ratio::try_from(1.5).is_err());
        assert!(Ratio::try_from(f64::NAN).is_err());
        assert_abs_diff_eq!(Ratio::try_from(0.7).unwrap().to_f64(), 0.7);

        let parsed: Ratio = serde_json::from_str("0.25").unwrap();
        assert_eq!(parsed.to_f64(), 0.25);
        assert!(serde_json::from_str::<Ratio>("2.0").is_err());
    }
}
