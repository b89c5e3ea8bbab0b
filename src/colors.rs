use eframe::egui::Color32;

pub const GRAY_40: Color32 = Color32::from_gray(40);
pub const GRAY_180: Color32 = Color32::from_gray(180);
pub const GRAY_230: Color32 = Color32::from_gray(230);

pub const VERY_LIGHT_BLUE: Color32 = Color32::from_rgb(220, 230, 245);
pub const INTENSE_BLUE: Color32 = Color32::from_rgb(50, 150, 220);

pub const VERY_LIGHT_YELLOW: Color32 = Color32::from_rgb(255, 255, 220);
pub const DARK_YELLOW: Color32 = Color32::from_rgb(242, 176, 34);
pub const MILD_RED: Color32 = Color32::from_rgb(220, 50, 50);

/// Color of a span bar, failed spans stand out.
pub fn span_color(status: Option<&str>) -> Color32 {
    match status {
        Some("ok") | None => INTENSE_BLUE,
        Some(_) => MILD_RED,
    }
}
