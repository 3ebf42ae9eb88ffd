//! Metrics for the 14 built-in PDF base fonts.
//!
//! These fonts require no embedding; viewers carry them. Widths are AFM
//! advance widths in 1/1000 em for the printable ASCII range, which is what
//! layout needs to measure text set in them. Codepoints outside the table
//! fall back to the per-font default width.

/// One of the 14 standard PDF base fonts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseFont {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    TimesRoman,
    TimesBold,
    TimesItalic,
    TimesBoldItalic,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
    Symbol,
    ZapfDingbats,
}

impl BaseFont {
    /// The PostScript name used in PDF font dictionaries.
    pub fn pdf_name(self) -> &'static str {
        match self {
            Self::Helvetica => "Helvetica",
            Self::HelveticaBold => "Helvetica-Bold",
            Self::HelveticaOblique => "Helvetica-Oblique",
            Self::HelveticaBoldOblique => "Helvetica-BoldOblique",
            Self::TimesRoman => "Times-Roman",
            Self::TimesBold => "Times-Bold",
            Self::TimesItalic => "Times-Italic",
            Self::TimesBoldItalic => "Times-BoldItalic",
            Self::Courier => "Courier",
            Self::CourierBold => "Courier-Bold",
            Self::CourierOblique => "Courier-Oblique",
            Self::CourierBoldOblique => "Courier-BoldOblique",
            Self::Symbol => "Symbol",
            Self::ZapfDingbats => "ZapfDingbats",
        }
    }

    /// Resolve a family/weight/style request to a base font, if the family
    /// is one of the base families.
    pub fn from_family(family: &str, weight: u16, italic: bool) -> Option<BaseFont> {
        let bold = weight >= 600;
        let fam = family.trim().to_ascii_lowercase();
        Some(match fam.as_str() {
            "helvetica" | "arial" => match (bold, italic) {
                (false, false) => Self::Helvetica,
                (true, false) => Self::HelveticaBold,
                (false, true) => Self::HelveticaOblique,
                (true, true) => Self::HelveticaBoldOblique,
            },
            "times" | "times-roman" | "times new roman" => match (bold, italic) {
                (false, false) => Self::TimesRoman,
                (true, false) => Self::TimesBold,
                (false, true) => Self::TimesItalic,
                (true, true) => Self::TimesBoldItalic,
            },
            "courier" | "courier new" => match (bold, italic) {
                (false, false) => Self::Courier,
                (true, false) => Self::CourierBold,
                (false, true) => Self::CourierOblique,
                (true, true) => Self::CourierBoldOblique,
            },
            "symbol" => Self::Symbol,
            "zapfdingbats" | "zapf dingbats" => Self::ZapfDingbats,
            _ => return None,
        })
    }

    pub fn metrics(self) -> &'static BaseMetrics {
        match self {
            Self::Helvetica | Self::HelveticaOblique => &HELVETICA,
            Self::HelveticaBold | Self::HelveticaBoldOblique => &HELVETICA_BOLD,
            Self::TimesRoman => &TIMES_ROMAN,
            Self::TimesBold => &TIMES_BOLD,
            Self::TimesItalic => &TIMES_ITALIC,
            Self::TimesBoldItalic => &TIMES_BOLD_ITALIC,
            Self::Courier | Self::CourierBold | Self::CourierOblique | Self::CourierBoldOblique => {
                &COURIER
            }
            Self::Symbol => &SYMBOL,
            Self::ZapfDingbats => &ZAPF_DINGBATS,
        }
    }
}

/// AFM-derived metrics, all in 1/1000 em.
pub struct BaseMetrics {
    pub ascender: i16,
    pub descender: i16,
    pub cap_height: i16,
    pub x_height: i16,
    /// Advance widths for U+0020..=U+007E, in codepoint order.
    widths: &'static [u16],
    default_width: u16,
}

impl BaseMetrics {
    /// Advance width of a character in 1/1000 em.
    pub fn advance(&self, ch: char) -> u16 {
        let cp = ch as u32;
        if (0x20..=0x7E).contains(&cp) {
            let idx = (cp - 0x20) as usize;
            if idx < self.widths.len() {
                return self.widths[idx];
            }
        }
        self.default_width
    }

    /// Advance width of a character in points at the given size.
    pub fn char_width(&self, ch: char, font_size: f64) -> f64 {
        self.advance(ch) as f64 / 1000.0 * font_size
    }

    /// Width of a string in points at the given size.
    pub fn measure(&self, text: &str, font_size: f64, letter_spacing: f64) -> f64 {
        text.chars()
            .map(|c| self.char_width(c, font_size) + letter_spacing)
            .sum()
    }
}

#[rustfmt::skip]
static HELVETICA: BaseMetrics = BaseMetrics {
    ascender: 718, descender: -207, cap_height: 718, x_height: 523,
    widths: &[
        278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333,
        278, 278, 556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278,
        584, 584, 584, 556, 1015, 667, 667, 722, 722, 667, 611, 778, 722, 278,
        500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944,
        667, 667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556,
        278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500,
        278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
    ],
    default_width: 556,
};

#[rustfmt::skip]
static HELVETICA_BOLD: BaseMetrics = BaseMetrics {
    ascender: 718, descender: -207, cap_height: 718, x_height: 532,
    widths: &[
        278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333,
        278, 278, 556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333,
        584, 584, 584, 611, 975, 722, 722, 722, 722, 667, 611, 778, 722, 278,
        556, 722, 611, 833, 722, 778, 667, 778, 722, 667, 611, 722, 667, 944,
        667, 667, 611, 333, 278, 333, 584, 556, 333, 556, 611, 556, 611, 556,
        333, 611, 611, 278, 278, 556, 278, 889, 611, 611, 611, 611, 389, 556,
        333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
    ],
    default_width: 556,
};

#[rustfmt::skip]
static TIMES_ROMAN: BaseMetrics = BaseMetrics {
    ascender: 683, descender: -217, cap_height: 662, x_height: 450,
    widths: &[
        250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333,
        250, 278, 500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278,
        564, 564, 564, 444, 921, 722, 667, 667, 722, 611, 556, 722, 722, 333,
        389, 722, 611, 889, 722, 722, 556, 722, 667, 556, 611, 722, 722, 944,
        722, 722, 611, 333, 278, 333, 469, 500, 333, 444, 500, 444, 500, 444,
        333, 500, 500, 278, 278, 500, 278, 778, 500, 500, 500, 500, 333, 389,
        278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
    ],
    default_width: 500,
};

#[rustfmt::skip]
static TIMES_BOLD: BaseMetrics = BaseMetrics {
    ascender: 683, descender: -217, cap_height: 676, x_height: 461,
    widths: &[
        250, 333, 555, 500, 500, 1000, 833, 278, 333, 333, 500, 570, 250, 333,
        250, 278, 500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333,
        570, 570, 570, 500, 930, 722, 667, 722, 722, 667, 611, 778, 778, 389,
        500, 778, 667, 944, 722, 778, 611, 778, 722, 556, 667, 722, 722, 1000,
        722, 722, 667, 333, 278, 333, 581, 500, 333, 500, 556, 444, 556, 444,
        333, 500, 556, 278, 333, 556, 278, 833, 556, 500, 556, 556, 444, 389,
        333, 556, 500, 722, 500, 500, 444, 394, 220, 394, 520,
    ],
    default_width: 500,
};

#[rustfmt::skip]
static TIMES_ITALIC: BaseMetrics = BaseMetrics {
    ascender: 683, descender: -217, cap_height: 653, x_height: 441,
    widths: &[
        250, 333, 420, 500, 500, 833, 778, 214, 333, 333, 500, 675, 250, 333,
        250, 278, 500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333,
        675, 675, 675, 500, 920, 611, 611, 667, 722, 611, 611, 722, 722, 333,
        444, 667, 556, 833, 667, 722, 611, 722, 611, 500, 556, 722, 611, 833,
        611, 556, 556, 389, 278, 389, 422, 500, 333, 500, 500, 444, 500, 444,
        278, 500, 500, 278, 278, 444, 278, 722, 500, 500, 500, 500, 389, 389,
        278, 500, 444, 667, 444, 444, 389, 400, 275, 400, 541,
    ],
    default_width: 500,
};

#[rustfmt::skip]
static TIMES_BOLD_ITALIC: BaseMetrics = BaseMetrics {
    ascender: 683, descender: -217, cap_height: 669, x_height: 462,
    widths: &[
        250, 389, 555, 500, 500, 833, 778, 278, 333, 333, 500, 570, 250, 333,
        250, 278, 500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333,
        570, 570, 570, 500, 832, 667, 667, 667, 722, 667, 667, 722, 778, 389,
        500, 667, 611, 889, 722, 722, 611, 722, 667, 556, 611, 722, 667, 889,
        667, 611, 611, 333, 278, 333, 570, 500, 333, 500, 500, 444, 500, 444,
        333, 500, 556, 278, 278, 500, 278, 778, 556, 500, 500, 500, 389, 389,
        278, 556, 444, 667, 500, 444, 389, 348, 220, 348, 570,
    ],
    default_width: 500,
};

/// Courier is monospaced; every glyph advances 600.
static COURIER: BaseMetrics = BaseMetrics {
    ascender: 629,
    descender: -157,
    cap_height: 562,
    x_height: 426,
    widths: &[],
    default_width: 600,
};

/// Symbol and ZapfDingbats carry non-Latin glyph sets; layout only needs a
/// serviceable advance for the rare run set in them.
static SYMBOL: BaseMetrics = BaseMetrics {
    ascender: 692,
    descender: -216,
    cap_height: 673,
    x_height: 466,
    widths: &[],
    default_width: 550,
};

static ZAPF_DINGBATS: BaseMetrics = BaseMetrics {
    ascender: 718,
    descender: -207,
    cap_height: 718,
    x_height: 523,
    widths: &[],
    default_width: 788,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helvetica_space_width() {
        let m = BaseFont::Helvetica.metrics();
        assert_eq!(m.advance(' '), 278);
        assert!((m.char_width(' ', 12.0) - 3.336).abs() < 0.001);
    }

    #[test]
    fn test_bold_wider_than_regular() {
        let regular = BaseFont::Helvetica.metrics().advance('s');
        let bold = BaseFont::HelveticaBold.metrics().advance('s');
        assert!(bold > regular);
    }

    #[test]
    fn test_courier_monospace() {
        let m = BaseFont::Courier.metrics();
        assert_eq!(m.advance('i'), m.advance('W'));
        assert_eq!(m.advance('i'), 600);
    }

    #[test]
    fn test_family_resolution() {
        assert_eq!(
            BaseFont::from_family("Helvetica", 700, false),
            Some(BaseFont::HelveticaBold)
        );
        assert_eq!(
            BaseFont::from_family("times", 400, true),
            Some(BaseFont::TimesItalic)
        );
        assert_eq!(
            BaseFont::from_family("Courier", 400, false),
            Some(BaseFont::Courier)
        );
        assert_eq!(BaseFont::from_family("Inter", 400, false), None);
    }

    #[test]
    fn test_measure_hello() {
        // H 722 + e 556 + l 222 + l 222 + o 556 = 2278/1000 em
        let m = BaseFont::Helvetica.metrics();
        let w = m.measure("Hello", 24.0, 0.0);
        assert!((w - 2.278 * 24.0).abs() < 0.01);
    }

    #[test]
    fn test_out_of_range_uses_default() {
        let m = BaseFont::Helvetica.metrics();
        assert_eq!(m.advance('é'), 556);
    }
}
