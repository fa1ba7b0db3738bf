/// Represents an RGB color value.
///
/// # Fields
/// * `r` - Red component of the color.
/// * `g` - Green component of the color.
/// * `b` - Blue component of the color.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    r: u8,
    g: u8,
    b: u8,
}

impl Rgb {
    /// Creates a new `Rgb` instance.
    ///
    /// # Arguments
    /// * `r` - Red component of the color.
    /// * `g` - Green component of the color.
    /// * `b` - Blue component of the color.
    ///
    /// # Returns
    /// A new `Rgb` instance.
    #[must_use]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Selects the color band for a moisture percentage.
    ///
    /// Below 20% the soil reads as dry, below 50% as ideal, and anything at
    /// or above 50% as wet.
    ///
    /// # Arguments
    /// * `percent` - Moisture percentage in `[0.0, 100.0]`.
    ///
    /// # Returns
    /// The unscaled band color.
    #[must_use]
    pub fn for_moisture(percent: f32) -> Self {
        if percent < 20.0 {
            DRY
        } else if percent < 50.0 {
            IDEAL
        } else {
            WET
        }
    }

    /// Scales every channel by `brightness / 255`.
    ///
    /// # Arguments
    /// * `brightness` - Scale factor; 0 yields black, 255 the color itself.
    ///
    /// # Returns
    /// The scaled color.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // channel * brightness / 255 <= 255
    pub fn scaled(&self, brightness: u8) -> Self {
        let scale =
            |channel: u8| ((u16::from(channel) * u16::from(brightness)) / 255) as u8;

        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
        }
    }

    /// Formats the color as a CSS hex literal, e.g. `#2ecc71`.
    #[must_use]
    pub fn css(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<&Rgb> for u32 {
    /// Converts an `Rgb` instance to a `u32` color value.
    /// e.g. rgb: (1,2,4)
    /// G        R        B
    /// 7      0 7      0 7      0
    /// 00000010 00000001 00000100
    ///
    /// # Returns
    /// A `u32` representation of the RGB color.
    fn from(rgb: &Rgb) -> Self {
        (u32::from(rgb.g) << 16) | (u32::from(rgb.r) << 8) | u32::from(rgb.b)
    }
}

/// Predefined black color.
pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

/// Band color for dry soil (moisture below 20%).
pub const DRY: Rgb = Rgb {
    r: 231,
    g: 76,
    b: 60,
};

/// Band color for ideal soil (moisture between 20% and 50%).
pub const IDEAL: Rgb = Rgb {
    r: 243,
    g: 156,
    b: 18,
};

/// Band color for wet soil (moisture at or above 50%).
pub const WET: Rgb = Rgb {
    r: 46,
    g: 204,
    b: 113,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_thresholds() {
        assert_eq!(Rgb::for_moisture(0.0), DRY);
        assert_eq!(Rgb::for_moisture(19.9), DRY);
        assert_eq!(Rgb::for_moisture(20.0), IDEAL);
        assert_eq!(Rgb::for_moisture(49.9), IDEAL);
        assert_eq!(Rgb::for_moisture(50.0), WET);
        assert_eq!(Rgb::for_moisture(100.0), WET);
    }

    #[test]
    fn test_scaled_extremes() {
        assert_eq!(WET.scaled(0), BLACK);
        assert_eq!(WET.scaled(255), WET);
    }

    #[test]
    fn test_scaled_halves_channels() {
        let half = Rgb::new(200, 100, 2).scaled(127);
        assert_eq!(half, Rgb::new(99, 49, 0));
    }

    #[test]
    fn test_wire_format_is_grb() {
        let value = u32::from(&Rgb::new(1, 2, 4));
        assert_eq!(value, 0x0002_0104);
    }
}
