pub mod email;
pub mod telegram;

pub use email::{render_email, SmtpMailer};
pub use telegram::{escape_html, TelegramChannel};
