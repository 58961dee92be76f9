use dealdesk_core::pricing::PRICING_FIELDS;
use dealdesk_core::tokenizer::POSITIONAL_FIELDS;
use dealdesk_core::{
    DealDelimiter, DealOutcome, DealRecord, FieldError, FieldName, PricingModel, SubmissionReport,
};
use dealdesk_store::{StoreReceipt, SubmissionReceipt};
use serde::Serialize;

/// Upper bound on one outgoing chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const SOURCE_PREVIEW_CHARS: usize = 48;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    Plain { text: String },
    Html { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::Plain { text: text.into() }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self::Html { text: text.into() }
    }

    fn render(&self) -> String {
        match self {
            Self::Plain { text } => escape_html(text),
            Self::Html { text } => text.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { block_id: String, text: TextObject },
    Context { block_id: String, elements: Vec<TextObject> },
}

impl Block {
    pub fn block_id(&self) -> &str {
        match self {
            Self::Section { block_id, .. } | Self::Context { block_id, .. } => block_id,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Section { text, .. } => text.render(),
            Self::Context { elements, .. } => {
                let lines: Vec<String> =
                    elements.iter().map(|element| format!("<i>{}</i>", element.render())).collect();
                lines.join("\n")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

impl MessageTemplate {
    /// Renders the blocks as Telegram HTML, one paragraph per block.
    pub fn render_html(&self) -> String {
        if self.blocks.is_empty() {
            return escape_html(&self.fallback_text);
        }
        self.blocks.iter().map(Block::render).collect::<Vec<_>>().join("\n\n")
    }

    /// Rendered text split into messages of at most `max_chars` characters.
    ///
    /// Splits happen on line boundaries; a single line longer than the limit
    /// is cut at the limit.
    pub fn render_chunks(&self, max_chars: usize) -> Vec<String> {
        split_chunks(&self.render_html(), max_chars)
    }

    pub fn find_block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|block| block.block_id() == block_id)
    }
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        self.blocks.push(Block::Section { block_id: block_id.into(), text: builder.build() });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        let elements = builder.build();
        if !elements.is_empty() {
            self.blocks.push(Block::Context { block_id: block_id.into(), elements });
        }
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn html(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::html(text));
        self
    }

    fn build(self) -> TextObject {
        self.text.unwrap_or_else(|| TextObject::plain(""))
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn html(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::html(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for line in text.split('\n') {
        let line_chars = line.chars().count();
        let separator = usize::from(!current.is_empty());

        if current_chars + separator + line_chars <= max_chars {
            if separator == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_chars += separator + line_chars;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_chars = 0;
        }

        let mut rest = line;
        while rest.chars().count() > max_chars {
            let cut = rest.char_indices().nth(max_chars).map_or(rest.len(), |(offset, _)| offset);
            chunks.push(rest[..cut].to_owned());
            rest = &rest[cut..];
        }
        current.push_str(rest);
        current_chars = rest.chars().count();
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }
    chunks
}

fn sample_value(field: FieldName) -> &'static str {
    match field {
        FieldName::Partner => "Acme Media",
        FieldName::Region => "Tier 1",
        FieldName::Geo => "DE, AT",
        FieldName::Language => "German",
        FieldName::Sources => "Facebook, Google",
        FieldName::Model => "CPA/CRG",
        FieldName::Cpa => "1100",
        FieldName::Crg => "10%",
        FieldName::Cpl => "25",
        FieldName::Funnels => "Immediate Edge",
        FieldName::Cr => "8%",
        FieldName::Deduction => "5%",
    }
}

/// A complete CPA/CRG deal, one line per required field.
pub fn example_deal() -> String {
    let model = PricingModel::CpaCrg;
    FieldName::ALL
        .iter()
        .filter(|field| field.spec().required || model.requires(**field))
        .map(|field| format!("{field}: {}", sample_value(*field)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn delimiter_hint(delimiter: &DealDelimiter) -> String {
    match delimiter {
        DealDelimiter::BlankLine => "Separate several deals with an empty line.".to_owned(),
        DealDelimiter::Separator(token) => {
            format!("Separate several deals with a line containing only {token}")
        }
    }
}

/// Field order of the one-line deal form, e.g. `Region-Partner-GEO-...`.
pub fn compact_layout() -> String {
    POSITIONAL_FIELDS.iter().map(|field| field.as_str()).collect::<Vec<_>>().join("-")
}

pub fn welcome_message(delimiter: &DealDelimiter) -> MessageTemplate {
    MessageBuilder::new("Send deals as `Field: value` lines.")
        .section("deal.welcome.summary.v1", |section| {
            section.html(
                "<b>Deal desk</b>\nSend one or more deals as <code>Field: value</code> lines and I will check them and save the valid ones.",
            );
        })
        .section("deal.welcome.example.v1", |section| {
            section.html(format!("<pre>{}</pre>", escape_html(&example_deal())));
        })
        .section("deal.welcome.compact.v1", |section| {
            section.html(format!(
                "Or one deal per line, <code>&amp;</code> for an empty position:\n<code>{}</code>",
                escape_html(&compact_layout())
            ));
        })
        .context("deal.welcome.context.v1", |context| {
            context.plain(delimiter_hint(delimiter));
            context.plain("Send /help for the field reference.");
        })
        .build()
}

pub fn help_message(delimiter: &DealDelimiter) -> MessageTemplate {
    let required = FieldName::ALL
        .iter()
        .filter(|field| field.spec().required)
        .map(|field| format!("• <b>{field}</b>: {}", escape_html(field.spec().syntax.expectation())))
        .collect::<Vec<_>>()
        .join("\n");
    let optional = FieldName::ALL
        .iter()
        .filter(|field| !field.spec().required && !PRICING_FIELDS.contains(field))
        .map(|field| format!("• <b>{field}</b>: {}", escape_html(field.spec().syntax.expectation())))
        .collect::<Vec<_>>()
        .join("\n");
    let models = PricingModel::ALL
        .iter()
        .map(|model| {
            let rules = model.rules();
            let list = |fields: &[FieldName]| {
                fields.iter().map(FieldName::as_str).collect::<Vec<_>>().join(", ")
            };
            format!(
                "• <b>{}</b>: requires {}; must not include {}",
                escape_html(model.label()),
                list(rules.required),
                list(rules.forbidden)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    MessageBuilder::new("Deal field reference")
        .section("deal.help.required.v1", |section| {
            section.html(format!("<b>Required fields</b>\n{required}"));
        })
        .section("deal.help.optional.v1", |section| {
            section.html(format!("<b>Optional fields</b>\n{optional}"));
        })
        .section("deal.help.models.v1", |section| {
            section.html(format!("<b>Pricing models</b>\n{models}"));
        })
        .context("deal.help.context.v1", |context| {
            context.plain(delimiter_hint(delimiter));
            context.plain("Separate multiple values with any of , ; | +");
        })
        .build()
}

pub fn unknown_command_message(command: &str) -> MessageTemplate {
    MessageBuilder::new(format!("Unsupported command /{command}"))
        .section("deal.command.unknown.v1", |section| {
            section.plain(format!("Unsupported command /{command}. Try /help."));
        })
        .build()
}

pub fn empty_submission_message() -> MessageTemplate {
    MessageBuilder::new("No deals found in the message")
        .section("deal.empty.summary.v1", |section| {
            section.plain("I could not find any deal in that message. Send /start for an example.");
        })
        .build()
}

/// Whole-submission rejection (too long, too many deals, internal failure).
pub fn rejection_message(
    summary: &str,
    detail: Option<&str>,
    correlation_id: &str,
) -> MessageTemplate {
    MessageBuilder::new(summary.to_owned())
        .section("deal.rejected.summary.v1", |section| match detail {
            Some(detail) => {
                section.html(format!("⚠️ {}\n{}", escape_html(summary), escape_html(detail)));
            }
            None => {
                section.html(format!("⚠️ {}", escape_html(summary)));
            }
        })
        .context("deal.rejected.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build()
}

pub fn error_message(summary: &str, correlation_id: &str) -> MessageTemplate {
    rejection_message(summary, None, correlation_id)
}

/// Per-deal validation report, followed by the store receipt when deals were
/// written.
pub fn report_message(
    report: &SubmissionReport,
    receipt: Option<&SubmissionReceipt>,
) -> MessageTemplate {
    let headline = format!(
        "Checked {} deal(s): {} valid, {} invalid",
        report.total(),
        report.valid_count,
        report.invalid_count
    );

    let mut builder = MessageBuilder::new(headline.clone())
        .section("deal.report.summary.v1", |section| {
            section.html(format!("<b>{}</b>", escape_html(&headline)));
        });

    for outcome in &report.outcomes {
        let store_line = receipt.and_then(|receipt| {
            receipt.receipts.iter().find(|entry| entry.index() == outcome.index()).map(receipt_line)
        });
        builder = builder
            .section(format!("deal.report.outcome.{}.v1", outcome.index()), |section| {
                section.html(outcome_text(outcome, store_line.as_deref()));
            })
            .context(format!("deal.report.warnings.{}.v1", outcome.index()), |context| {
                for warning in outcome.warnings() {
                    context.plain(format!("Ignored: {}", warning.message));
                }
            });
    }

    if let Some(receipt) = receipt.filter(|receipt| !receipt.is_empty()) {
        builder = builder.context("deal.report.receipt.v1", |context| {
            context.plain(format!(
                "Saved {} of {} valid deal(s); {} failed to save.",
                receipt.stored_count,
                receipt.receipts.len(),
                receipt.failed_count
            ));
        });
    }

    builder.build()
}

fn outcome_text(outcome: &DealOutcome, store_line: Option<&str>) -> String {
    match outcome {
        DealOutcome::Valid { index, record, .. } => {
            let mut lines = vec![format!(
                "✅ <b>Deal {index}</b>: {} ({})",
                escape_html(record.partner()),
                escape_html(record.model().label())
            )];
            lines.extend(record_lines(record));
            if let Some(store_line) = store_line {
                lines.push(store_line.to_owned());
            }
            lines.join("\n")
        }
        DealOutcome::Invalid { index, source_text, errors, .. } => {
            let mut lines =
                vec![format!("❌ <b>Deal {index}</b>: {}", escape_html(&source_preview(source_text)))];
            lines.extend(errors.iter().map(error_line));
            lines.join("\n")
        }
    }
}

fn record_lines(record: &DealRecord) -> impl Iterator<Item = String> + '_ {
    record
        .iter()
        .filter(|(field, _)| !matches!(field, FieldName::Partner | FieldName::Model))
        .map(|(field, value)| format!("{field}: {}", escape_html(&value.display())))
}

fn error_line(error: &FieldError) -> String {
    format!("• {}", escape_html(&error.message))
}

fn receipt_line(receipt: &StoreReceipt) -> String {
    match receipt {
        StoreReceipt::Stored { url: Some(url), .. } => {
            format!("💾 saved: <a href=\"{}\">open entry</a>", escape_html(url).replace('"', "&quot;"))
        }
        StoreReceipt::Stored { id, .. } => format!("💾 saved as {}", escape_html(id)),
        StoreReceipt::StoreWriteFailed { message, .. } => {
            format!("⚠️ not saved: {}", escape_html(message))
        }
    }
}

fn source_preview(source_text: &str) -> String {
    let first_line = source_text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or("");
    if first_line.chars().count() <= SOURCE_PREVIEW_CHARS {
        return first_line.to_owned();
    }
    let mut preview: String = first_line.chars().take(SOURCE_PREVIEW_CHARS).collect();
    preview.push('…');
    preview
}

#[cfg(test)]
mod tests {
    use dealdesk_core::{parse_and_validate, DealDelimiter, IntakeConfig};
    use dealdesk_store::{StoreReceipt, SubmissionReceipt};

    use super::{
        error_message, example_deal, help_message, report_message, split_chunks, welcome_message,
        Block, MessageBuilder, TextObject,
    };

    const SUBMISSION: &str = "\
Partner: Acme <Media>
GEO: DE
Language: de
Sources: fb
Model: CPL
CPL: 20
Funnels: x
Bonus: yes

Partner: Broken
GEO: US
";

    #[test]
    fn message_builder_creates_typed_block_structure() {
        let message = MessageBuilder::new("fallback")
            .section("deal.summary.v1", |section| {
                section.html("<b>Summary</b>");
            })
            .context("deal.summary.context.v1", |context| {
                context.plain("note");
            })
            .context("deal.summary.empty.v1", |_| {})
            .build();

        assert_eq!(message.blocks.len(), 2);
        assert!(matches!(
            &message.blocks[0],
            Block::Section { block_id, text: TextObject::Html { .. } } if block_id == "deal.summary.v1"
        ));
        assert_eq!(message.render_html(), "<b>Summary</b>\n\n<i>note</i>");
    }

    #[test]
    fn plain_text_is_escaped_when_rendered() {
        let message = MessageBuilder::new("x")
            .section("s", |section| {
                section.plain("a < b & c");
            })
            .build();
        assert_eq!(message.render_html(), "a &lt; b &amp; c");
    }

    #[test]
    fn error_template_contains_correlation_id() {
        let message = error_message("Cannot process request", "req-123");
        let elements = if let Block::Context { elements, .. } = &message.blocks[1] {
            Some(elements)
        } else {
            None
        };
        let elements = elements.expect("context block");
        assert!(matches!(
            elements.first(),
            Some(TextObject::Plain { text }) if text.contains("req-123")
        ));
    }

    #[test]
    fn example_deal_is_itself_a_valid_submission() {
        let report = parse_and_validate(&example_deal(), &IntakeConfig::default()).expect("report");
        assert_eq!(report.valid_count, 1, "{report:?}");
    }

    #[test]
    fn welcome_and_help_describe_the_grammar() {
        let welcome = welcome_message(&DealDelimiter::BlankLine).render_html();
        assert!(welcome.contains("Partner: Acme Media"));
        assert!(welcome.contains("empty line"));
        assert!(welcome.contains(
            "Region-Partner-GEO-Language-Sources-Model-CPA-CRG-CPL-Funnels-CR-Deduction"
        ));

        let help = help_message(&DealDelimiter::Separator("---".to_owned())).render_html();
        assert!(help.contains("<b>GEO</b>"));
        assert!(help.contains("<b>CPL</b>: requires CPL; must not include CPA, CRG"));
        assert!(help.contains("line containing only ---"));
    }

    #[test]
    fn report_lists_each_outcome_with_errors_and_receipt() {
        let report = parse_and_validate(SUBMISSION, &IntakeConfig::default()).expect("report");
        let receipt = SubmissionReceipt {
            receipts: vec![StoreReceipt::Stored {
                index: 1,
                partner: "Acme <Media>".to_owned(),
                id: "page-1".to_owned(),
                url: None,
            }],
            stored_count: 1,
            failed_count: 0,
        };

        let message = report_message(&report, Some(&receipt));
        let html = message.render_html();

        assert_eq!(message.fallback_text, "Checked 2 deal(s): 1 valid, 1 invalid");
        assert!(html.contains("✅ <b>Deal 1</b>: Acme &lt;Media&gt; (CPL)"));
        assert!(html.contains("💾 saved as page-1"));
        assert!(html.contains("❌ <b>Deal 2</b>: Partner: Broken"));
        assert!(html.contains("• Language is required but was not provided"));
        assert!(html.contains("Ignored: `Bonus` is not a recognized deal field"));
        assert!(message.find_block("deal.report.receipt.v1").is_some());
    }

    #[test]
    fn chunks_split_on_lines_and_respect_the_limit() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_chunks(text, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_chunks("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(split_chunks("short", 4096), vec!["short"]);

        let long = "ü".repeat(10);
        for chunk in split_chunks(&long, 4) {
            assert!(chunk.chars().count() <= 4);
        }
    }
}
