pub mod params;
pub mod regex;
