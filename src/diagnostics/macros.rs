//! Diagnostic macros.
//!
//! These macros provide a rustc-like diagnostic experience. Output gating
//! lives in [`emit`](super::emit), so an installed sink sees diagnostics in
//! every build profile.

/// Emit a one-off runtime diagnostic.
///
/// # Example
///
/// ```rust,ignore
/// ft_diagnostic!(
///     Warning,
///     code = "FT203",
///     message = "loop item panicked during advance",
///     help = "return an error through the task instead"
/// );
/// ```
#[macro_export]
macro_rules! ft_diagnostic {
    (
        $kind:ident,
        code = $code:expr,
        message = $msg:expr
        $(, note = $note:expr)?
        $(, help = $help:expr)?
    ) => {{
        let diag = $crate::diagnostics::Diagnostic {
            kind: $crate::diagnostics::DiagnosticKind::$kind,
            code: $code,
            message: $msg,
            note: None $(.or(Some($note)))?,
            help: None $(.or(Some($help)))?,
        };
        $crate::diagnostics::emit::emit(&diag);
    }};
}

/// Emit a predefined diagnostic by code.
///
/// ```rust,ignore
/// ft_emit!(FT001);
/// ```
#[macro_export]
macro_rules! ft_emit {
    ($code:ident) => {{
        $crate::diagnostics::emit::emit(&$crate::diagnostics::$code);
    }};
}

/// Emit a predefined diagnostic with a formatted detail line.
///
/// The detail is only formatted when diagnostics are not suppressed.
///
/// ```rust,ignore
/// ft_emit_detail!(FT201, "timing {}", timing);
/// ```
#[macro_export]
macro_rules! ft_emit_detail {
    ($code:ident, $($arg:tt)+) => {{
        if !$crate::diagnostics::emit::is_suppressed() {
            $crate::diagnostics::emit::emit_with_detail(
                &$crate::diagnostics::$code,
                &format!($($arg)+),
            );
        }
    }};
}
