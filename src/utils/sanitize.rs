//! Filename sanitization for stored uploads.
//!
//! Cyrillic is transliterated to Latin, whitespace becomes `_`, and anything
//! outside `[A-Za-z0-9._-]` is dropped. The result is always non-empty.

const FALLBACK_NAME: &str = "file";

fn transliterate_char(c: char) -> Option<&'static str> {
    let latin = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'д' => "d",
        'е' => "e",
        'ё' => "yo",
        'ж' => "zh",
        'з' => "z",
        'и' => "i",
        'й' => "j",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "sch",
        'ъ' => "",
        'ы' => "y",
        'ь' => "",
        'э' => "e",
        'ю' => "yu",
        'я' => "ya",
        'А' => "A",
        'Б' => "B",
        'В' => "V",
        'Г' => "G",
        'Д' => "D",
        'Е' => "E",
        'Ё' => "Yo",
        'Ж' => "Zh",
        'З' => "Z",
        'И' => "I",
        'Й' => "J",
        'К' => "K",
        'Л' => "L",
        'М' => "M",
        'Н' => "N",
        'О' => "O",
        'П' => "P",
        'Р' => "R",
        'С' => "S",
        'Т' => "T",
        'У' => "U",
        'Ф' => "F",
        'Х' => "Kh",
        'Ц' => "Ts",
        'Ч' => "Ch",
        'Ш' => "Sh",
        'Щ' => "Sch",
        'Ъ' => "",
        'Ы' => "Y",
        'Ь' => "",
        'Э' => "E",
        'Ю' => "Yu",
        'Я' => "Ya",
        _ => return None,
    };
    Some(latin)
}

/// Replaces Cyrillic letters with their Latin phonetic equivalents.
/// Every other character is passed through unchanged.
pub fn transliterate(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match transliterate_char(c) {
            Some(latin) => out.push_str(latin),
            None => out.push(c),
        }
    }
    out
}

/// Sanitizes a single name component (no extension handling).
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = false;

    for c in transliterate(raw).chars() {
        let c = if c == ' ' { '_' } else { c };
        if !(c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_') {
            continue;
        }
        if c == '_' {
            if last_underscore {
                continue;
            }
            last_underscore = true;
        } else {
            last_underscore = false;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Produces a stable, filesystem-safe filename from a user-supplied one.
///
/// Name and extension (split on the last `.`) are sanitized independently so
/// that the extension survives even when the name is reduced to nothing.
pub fn sanitize(original: &str) -> String {
    if original.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    match original.rsplit_once('.') {
        Some((name, ext)) => format!("{}.{}", sanitize_component(name), sanitize_component(ext)),
        None => sanitize_component(original),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_safe(s: &str) -> bool {
        !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    }

    #[test]
    fn test_transliterate() {
        assert_eq!(transliterate("отчёт"), "otchyot");
        assert_eq!(transliterate("Щука и ЁЖ"), "Schuka i YoZh");
        assert_eq!(transliterate("объём"), "obyom");
        assert_eq!(transliterate("plain ascii"), "plain ascii");
    }

    #[test]
    fn test_sanitize_cyrillic_report() {
        assert_eq!(sanitize("отчёт по ИБ.pdf"), "otchyot_po_IB.pdf");
        assert_eq!(sanitize("тестовый файл.txt"), "testovyj_fajl.txt");
    }

    #[test]
    fn test_sanitize_special_chars() {
        let name = sanitize("file@#$%^&*().pdf");
        assert_eq!(name, "file.pdf");

        assert_eq!(sanitize("my   report (final).docx"), "my_report_final.docx");
        assert_eq!(sanitize("__lead__trail__.zip"), "lead_trail.zip");
    }

    #[test]
    fn test_sanitize_fallbacks() {
        assert_eq!(sanitize(""), "file");
        assert_eq!(sanitize("@@@"), "file");
        assert_eq!(sanitize("###.pdf"), "file.pdf");
        assert_eq!(sanitize("report."), "report.file");
        assert_eq!(sanitize(".gitignore"), "file.gitignore");
        assert_eq!(sanitize("测试.txt"), "file.txt");
    }

    #[test]
    fn test_sanitize_keeps_inner_dots() {
        assert_eq!(sanitize("archive.tar.gz"), "archive.tar.gz");
        assert_eq!(sanitize("../../etc/passwd"), "....etcpasswd");
    }

    #[test]
    fn test_sanitize_idempotent_and_safe() {
        let samples = [
            "",
            ".",
            "..",
            "...",
            "_",
            "_._",
            "a._b",
            "x_.y",
            " .  ",
            "отчёт по ИБ.pdf",
            "Ёлка_ _ _.png",
            "../../etc/passwd",
            "file@#$%^&*().pdf",
            "résumé final.DOCX",
            "a__b__c",
            "name.with.many.dots.",
            "日本語.mp4",
            "ъь.ъь",
        ];

        for s in samples {
            let once = sanitize(s);
            assert!(is_safe(&once), "unsafe output {once:?} for {s:?}");
            assert_eq!(sanitize(&once), once, "not idempotent for {s:?}");
        }
    }
}
