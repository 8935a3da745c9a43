use katex::{OptsBuilder, OutputType};

/// Typeset a TeX expression to HTML. The error string is KaTeX's own message.
pub(crate) fn typeset(literal: &str, display_mode: bool) -> Result<String, String> {
    let mut builder = OptsBuilder::default();
    builder.display_mode(display_mode);
    builder.output_type(OutputType::Html);
    builder.throw_on_error(true);

    let opts = builder
        .build()
        .map_err(|err| format!("invalid KaTeX options: {err}"))?;

    katex::render_with_opts(literal, opts).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::typeset;

    #[test]
    fn typesets_inline_and_display() {
        let inline = typeset("x^2", false).expect("inline");
        assert!(inline.contains("class=\"katex\""));

        let display = typeset("\\frac{a}{b}", true).expect("display");
        assert!(display.contains("katex-display"));
    }

    #[test]
    fn reports_parse_errors() {
        assert!(typeset("\\frac{", false).is_err());
    }
}
