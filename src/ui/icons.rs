//! Emoji used by the build UI, with plain fallbacks for dumb terminals.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[FAIL]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static WRENCH: Emoji<'_, '_> = Emoji("🔧 ", "[FIX]");
pub static EYES: Emoji<'_, '_> = Emoji("👀 ", "[VERIFY]");
pub static BULB: Emoji<'_, '_> = Emoji("💡 ", "[TIP]");
pub static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");
