//! Utility functions for the bdsk-ble crate.

use std::fmt::Write as _;

/// Format bytes as upper-case hex, two digits per byte, no separators.
///
/// # Example
///
/// ```
/// use bdsk_ble::hex_string;
///
/// assert_eq!(hex_string(&[0x01, 0xab, 0x0f]), "01AB0F");
/// ```
pub fn hex_string(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{:02X}", byte);
    }
    hex
}

/// Key used to look a raw temperature payload up in a [`TemperatureTable`].
///
/// [`TemperatureTable`]: crate::data::TemperatureTable
pub fn temperature_key(bytes: &[u8]) -> String {
    hex_string(bytes).trim().to_lowercase()
}

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use bdsk_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert Fahrenheit to Celsius.
#[inline]
pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}
