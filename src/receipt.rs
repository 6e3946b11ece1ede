//! Minimal PDF receipt rendering.
//!
//! A single-page PDF built by hand: one font object, one content stream of
//! text operators, a correct xref table. Enough for any PDF reader; no
//! external rendering stack.

/// One line of the receipt body.
pub struct ReceiptLine {
    pub label: String,
    pub value: String,
}

/// Renders a one-page PDF receipt.
pub fn render_pdf(title: &str, lines: &[ReceiptLine]) -> Vec<u8> {
    let mut content = String::new();
    content.push_str("BT\n/F1 16 Tf\n50 770 Td\n");
    content.push_str(&format!("({}) Tj\n", escape_pdf_text(title)));
    content.push_str("/F1 11 Tf\n0 -30 Td\n");
    for line in lines {
        content.push_str(&format!(
            "({}: {}) Tj\n0 -18 Td\n",
            escape_pdf_text(&line.label),
            escape_pdf_text(&line.value)
        ));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
            .to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        format!("<< /Length {} >>\nstream\n{content}endstream", content.len()),
    ];

    let mut pdf: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (index, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n{body}\nendobj\n", index + 1).as_bytes());
    }
    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );
    pdf
}

fn escape_pdf_text(text: &str) -> String {
    text.chars()
        .flat_map(|c| match c {
            '(' => vec!['\\', '('],
            ')' => vec!['\\', ')'],
            '\\' => vec!['\\', '\\'],
            c if c.is_ascii() && !c.is_control() => vec![c],
            // Helvetica WinAnsi can't carry arbitrary unicode; transliterate.
            _ => vec!['?'],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_nonempty_pdf() {
        let pdf = render_pdf(
            "AP2 Payment Receipt",
            &[
                ReceiptLine {
                    label: "Transaction".to_string(),
                    value: "txn_0001".to_string(),
                },
                ReceiptLine {
                    label: "Total".to_string(),
                    value: "9300 JPY".to_string(),
                },
            ],
        );
        assert!(pdf.starts_with(b"%PDF-1.4"));
        assert!(pdf.ends_with(b"%%EOF\n"));
        assert!(pdf.len() > 500);
    }

    #[test]
    fn test_escapes_parentheses() {
        let pdf = render_pdf(
            "Receipt (copy)",
            &[ReceiptLine {
                label: "Note".to_string(),
                value: "includes (tax)".to_string(),
            }],
        );
        let text = String::from_utf8_lossy(&pdf);
        assert!(text.contains("Receipt \\(copy\\)"));
    }
}
