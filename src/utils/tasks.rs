//! Task names and their legacy aliases.

/// Legacy task names and the task each maps to
pub const TASK_ALIASES: &[(&str, &str)] = &[
    ("sequence-classification", "text-classification"),
    ("causal-lm", "text-generation"),
    ("seq2seq-lm", "text2text-generation"),
    ("summarization", "text2text-generation"),
    ("translation", "text2text-generation"),
    ("default", "feature-extraction"),
    ("masked-lm", "fill-mask"),
];

/// Map a legacy task name to its current name; other names pass through
pub fn normalize_task(task: &str) -> &str {
    TASK_ALIASES
        .iter()
        .find(|(alias, _)| *alias == task)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(task)
}

/// Encoder-decoder tasks, which cannot be statically quantized
pub fn is_seq2seq_task(task: &str) -> bool {
    normalize_task(task) == "text2text-generation"
}
