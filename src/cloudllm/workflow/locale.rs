//! Localized text for progress messages, chitchat templates, and the error
//! fallback message, keyed by lowercased language name. Missing entries fall
//! back to English, matching §9's "Locale text" design note.

/// One language's worth of user-facing copy.
struct LocaleStrings {
    chitchat_greeting: &'static str,
    sources_label: &'static str,
    plan_ready: &'static str,
    executing_agents: &'static str,
    recovered_suffix: &'static str,
    incomplete_footer: &'static str,
    fallback_apology: &'static str,
    fallback_suggestions: [&'static str; 3],
}

const ENGLISH: LocaleStrings = LocaleStrings {
    chitchat_greeting: "Hello! How can I help you today?",
    sources_label: "Sources:",
    plan_ready: "Execution plan ready, starting agents...",
    executing_agents: "Running agents...",
    recovered_suffix: " (recovered after retry)",
    incomplete_footer: "Note: these results may be incomplete.",
    fallback_apology: "Sorry, I wasn't able to complete that request.",
    fallback_suggestions: [
        "Try again in a moment.",
        "Rephrase your question with more detail.",
        "Contact support if the problem persists.",
    ],
};

const VIETNAMESE: LocaleStrings = LocaleStrings {
    chitchat_greeting: "Xin chào! Tôi có thể giúp gì cho bạn hôm nay?",
    sources_label: "Nguồn tham khảo:",
    plan_ready: "Kế hoạch thực thi đã sẵn sàng, đang khởi chạy các tác nhân...",
    executing_agents: "Đang chạy các tác nhân...",
    recovered_suffix: " (đã khôi phục sau khi thử lại)",
    incomplete_footer: "Lưu ý: kết quả này có thể chưa đầy đủ.",
    fallback_apology: "Xin lỗi, tôi không thể hoàn thành yêu cầu đó.",
    fallback_suggestions: [
        "Vui lòng thử lại sau giây lát.",
        "Diễn đạt lại câu hỏi của bạn với nhiều chi tiết hơn.",
        "Liên hệ hỗ trợ nếu sự cố vẫn tiếp diễn.",
    ],
};

fn lookup(language: &str) -> &'static LocaleStrings {
    match language.to_lowercase().as_str() {
        "vietnamese" => &VIETNAMESE,
        _ => &ENGLISH,
    }
}

pub fn chitchat_greeting(language: &str) -> String {
    lookup(language).chitchat_greeting.to_string()
}

pub fn sources_label(language: &str) -> String {
    lookup(language).sources_label.to_string()
}

pub fn plan_ready(language: &str) -> String {
    lookup(language).plan_ready.to_string()
}

pub fn executing_agents(language: &str) -> String {
    lookup(language).executing_agents.to_string()
}

pub fn recovered_suffix(language: &str) -> String {
    lookup(language).recovered_suffix.to_string()
}

pub fn incomplete_footer(language: &str) -> String {
    lookup(language).incomplete_footer.to_string()
}

/// The base apology plus 3 suggestions (retry later, rephrase, contact
/// support) from §4.5/S5, joined into one user-facing message.
pub fn total_failure_message(language: &str) -> String {
    let s = lookup(language);
    format!(
        "{}\n- {}\n- {}\n- {}",
        s.fallback_apology, s.fallback_suggestions[0], s.fallback_suggestions[1], s.fallback_suggestions[2]
    )
}
