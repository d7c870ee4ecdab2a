// 🔤 Label folding - one canonical comparison form for Spanish labels
//
// Source spreadsheets mix "Básica", "Basica", "BASICA" and mis-decoded UTF-8
// ("BÃ¡sica"). Every lookup table in the crate compares folded text only.

/// Mis-decoded UTF-8 sequences seen in exported reports (Latin-1 read of UTF-8)
const MOJIBAKE: &[(&str, &str)] = &[
    ("Ã¡", "a"),
    ("Ã©", "e"),
    ("Ã\u{AD}", "i"),
    ("Ã³", "o"),
    ("Ãº", "u"),
    ("Ã±", "n"),
    ("Ã¼", "u"),
    ("Ã\u{81}", "a"),
    ("Ã‰", "e"),
    ("Ã“", "o"),
    ("Ãš", "u"),
    ("Ã‘", "n"),
];

fn strip_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'Á' | 'À' | 'Â' | 'Ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Ì' | 'Î' | 'Ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'Ó' | 'Ò' | 'Ô' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ñ' | 'Ñ' => 'n',
        other => other,
    }
}

/// Case-fold, strip diacritics, repair mojibake and collapse whitespace
///
/// `"  Inversión en  Títulos "` → `"inversion en titulos"`
pub fn fold(raw: &str) -> String {
    let mut repaired = raw.to_string();
    if repaired.contains('Ã') {
        for (bad, good) in MOJIBAKE {
            repaired = repaired.replace(bad, good);
        }
    }

    let folded: String = repaired
        .chars()
        .map(|c| if c == '\u{A0}' { ' ' } else { c })
        .map(strip_diacritic)
        .flat_map(char::to_lowercase)
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
