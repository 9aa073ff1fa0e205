//! Best-effort vehicle make/model extraction from part descriptions.
//!
//! Used only for parts that reference a virtual vehicle and arrive without
//! any vehicle record. The table maps a canonical make to the spellings
//! seen in upstream descriptions. The result is approximate and may be
//! `None`.

/// Canonical make and its accepted spellings (uppercase, single or
/// multi-word).
pub struct Brand {
    pub make: &'static str,
    pub variants: &'static [&'static str],
}

/// Maximum number of words taken after the make as the model.
pub const MAX_MODEL_WORDS: usize = 3;

pub const BRANDS: &[Brand] = &[
    Brand { make: "AUDI", variants: &["AUDI"] },
    Brand { make: "BMW", variants: &["BMW"] },
    Brand { make: "CITROEN", variants: &["CITROEN", "CITROËN"] },
    Brand { make: "FIAT", variants: &["FIAT"] },
    Brand { make: "FORD", variants: &["FORD"] },
    Brand { make: "HONDA", variants: &["HONDA"] },
    Brand { make: "HYUNDAI", variants: &["HYUNDAI"] },
    Brand { make: "KIA", variants: &["KIA"] },
    Brand { make: "MERCEDES-BENZ", variants: &["MERCEDES-BENZ", "MERCEDESBENZ", "MERCEDES"] },
    Brand { make: "NISSAN", variants: &["NISSAN"] },
    Brand { make: "OPEL", variants: &["OPEL"] },
    Brand { make: "PEUGEOT", variants: &["PEUGEOT"] },
    Brand { make: "RENAULT", variants: &["RENAULT"] },
    Brand { make: "SEAT", variants: &["SEAT"] },
    Brand { make: "SKODA", variants: &["SKODA", "ŠKODA"] },
    Brand { make: "SUZUKI", variants: &["SUZUKI"] },
    Brand { make: "TOYOTA", variants: &["TOYOTA"] },
    Brand { make: "VOLKSWAGEN", variants: &["VOLKSWAGEN", "VW"] },
    Brand { make: "VOLVO", variants: &["VOLVO"] },
    Brand { make: "CHEVROLET", variants: &["CHEVROLET"] },
    Brand { make: "SSANGYONG", variants: &["SSANGYONG"] },
    Brand { make: "MITSUBISHI", variants: &["MITSUBISHI"] },
    Brand { make: "MAZDA", variants: &["MAZDA"] },
    Brand { make: "SUBARU", variants: &["SUBARU"] },
    Brand { make: "ISUZU", variants: &["ISUZU"] },
    Brand { make: "DACIA", variants: &["DACIA"] },
    Brand { make: "LANCIA", variants: &["LANCIA"] },
    Brand { make: "ALFA ROMEO", variants: &["ALFA ROMEO", "ALFA"] },
    Brand { make: "JEEP", variants: &["JEEP"] },
    Brand { make: "CHRYSLER", variants: &["CHRYSLER"] },
    Brand { make: "DODGE", variants: &["DODGE"] },
    Brand { make: "MINI", variants: &["MINI"] },
    Brand { make: "SMART", variants: &["SMART"] },
    Brand { make: "PORSCHE", variants: &["PORSCHE"] },
    Brand { make: "JAGUAR", variants: &["JAGUAR"] },
    Brand { make: "LAND ROVER", variants: &["LAND ROVER", "LANDROVER"] },
    Brand { make: "LEXUS", variants: &["LEXUS"] },
    Brand { make: "INFINITI", variants: &["INFINITI"] },
    Brand { make: "ACURA", variants: &["ACURA"] },
];

/// Result of a successful brand scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrandMatch {
    pub make: String,
    pub model: Option<String>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_uppercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .map(|t| t.trim_matches('-'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Number of tokens consumed if any variant of `brand` starts at `pos`.
fn match_at(tokens: &[String], pos: usize, brand: &Brand) -> Option<usize> {
    brand
        .variants
        .iter()
        .map(|v| v.split(' ').collect::<Vec<_>>())
        .filter(|words| tokens.len() >= pos + words.len())
        .find(|words| {
            words
                .iter()
                .zip(&tokens[pos..])
                .all(|(w, t)| *w == t.as_str())
        })
        .map(|words| words.len())
}

fn brand_at(tokens: &[String], pos: usize) -> Option<(&'static Brand, usize)> {
    BRANDS
        .iter()
        .find_map(|b| match_at(tokens, pos, b).map(|len| (b, len)))
}

/// Scan `text` for the first known make and take up to
/// [`MAX_MODEL_WORDS`] following words as the model.
pub fn detect(text: &str) -> Option<BrandMatch> {
    let tokens = tokenize(text);

    (0..tokens.len()).find_map(|pos| {
        let (brand, len) = brand_at(&tokens, pos)?;
        let start = pos + len;
        let model_words: Vec<&str> = (start..tokens.len())
            .take_while(|&i| brand_at(&tokens, i).is_none())
            .take(MAX_MODEL_WORDS)
            .map(|i| tokens[i].as_str())
            .collect();

        Some(BrandMatch {
            make: brand.make.to_string(),
            model: (!model_words.is_empty()).then(|| model_words.join(" ")),
        })
    })
}
