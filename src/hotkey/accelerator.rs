//! Accelerator parser: `"CommandOrControl+Shift+Space"` to modifiers and key.
//!
//! Accelerators arrive in a platform-neutral key-combo syntax. They are
//! translated to the XDG shortcut trigger syntax for the portal's
//! `preferred_trigger` and to keysyms for native X11 grabs.

/// Accelerator parse errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcceleratorError {
    #[error("empty accelerator")]
    Empty,
    #[error("unknown modifier: {0:?}")]
    UnknownModifier(String),
    #[error("unknown key: {0:?}")]
    UnknownKey(String),
    #[error("accelerator needs a modifier: {0:?}")]
    MissingModifier(String),
}

/// Modifier set of an accelerator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub logo: bool,
}

impl Modifiers {
    pub fn is_empty(&self) -> bool {
        !(self.ctrl || self.alt || self.shift || self.logo)
    }
}

/// The non-modifier key of an accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    /// X keysym value.
    pub keysym: u32,
    /// XKB keysym name (`"space"`, `"a"`, `"F5"`).
    pub name: String,
}

impl Key {
    fn is_function_key(&self) -> bool {
        (XK_F1..XK_F1 + 24).contains(&self.keysym)
    }
}

/// A parsed accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accelerator {
    pub modifiers: Modifiers,
    pub key: Key,
    /// Original string, for logging.
    pub raw: String,
}

/// XK_F1; F2..F24 follow consecutively.
const XK_F1: u32 = 0xffbe;

impl Accelerator {
    /// Parse an accelerator string.
    ///
    /// Format: `Modifier[+Modifier...]+Key`. Function keys may stand
    /// alone; every other key needs at least one modifier.
    pub fn parse(spec: &str) -> Result<Self, AcceleratorError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(AcceleratorError::Empty);
        }

        let parts: Vec<&str> = spec.split('+').map(str::trim).collect();
        let (modifier_parts, key_name) = parts.split_at(parts.len() - 1);
        let key_name = key_name[0];
        if key_name.is_empty() {
            return Err(AcceleratorError::UnknownKey(spec.to_string()));
        }

        let mut modifiers = Modifiers::default();
        for &m in modifier_parts {
            apply_modifier(&mut modifiers, m)
                .ok_or_else(|| AcceleratorError::UnknownModifier(m.to_string()))?;
        }

        let key = parse_key(key_name)
            .ok_or_else(|| AcceleratorError::UnknownKey(key_name.to_string()))?;

        if modifiers.is_empty() && !key.is_function_key() {
            return Err(AcceleratorError::MissingModifier(spec.to_string()));
        }

        Ok(Self {
            modifiers,
            key,
            raw: spec.to_string(),
        })
    }

    /// Render in the XDG shortcut trigger syntax (`CTRL+SHIFT+space`).
    pub fn to_xdg_trigger(&self) -> String {
        let mut out = String::new();
        for (set, name) in [
            (self.modifiers.ctrl, "CTRL"),
            (self.modifiers.alt, "ALT"),
            (self.modifiers.shift, "SHIFT"),
            (self.modifiers.logo, "LOGO"),
        ] {
            if set {
                out.push_str(name);
                out.push('+');
            }
        }
        out.push_str(&self.key.name);
        out
    }
}

/// Fold a modifier name into `mods`. Returns `None` for unknown names.
fn apply_modifier(mods: &mut Modifiers, name: &str) -> Option<()> {
    match name.to_ascii_lowercase().as_str() {
        "ctrl" | "control" | "cmd" | "command" | "cmdorctrl" | "commandorcontrol" => {
            mods.ctrl = true
        }
        "alt" | "option" | "altgr" => mods.alt = true,
        "shift" => mods.shift = true,
        "super" | "meta" | "win" | "logo" => mods.logo = true,
        _ => return None,
    }
    Some(())
}

/// Map a key name to its keysym and XKB name.
fn parse_key(name: &str) -> Option<Key> {
    let key = |keysym: u32, name: &str| {
        Some(Key {
            keysym,
            name: name.to_string(),
        })
    };

    if name.len() == 1 {
        let ch = name.chars().next()?;
        if ch.is_ascii_alphabetic() {
            let lower = ch.to_ascii_lowercase();
            return key(lower as u32, &lower.to_string());
        }
        if ch.is_ascii_digit() {
            return key(ch as u32, name);
        }
    }

    if let Some(rest) = name.strip_prefix('F').or_else(|| name.strip_prefix('f'))
        && let Ok(n) = rest.parse::<u32>()
        && (1..=24).contains(&n)
    {
        return key(XK_F1 + n - 1, &format!("F{n}"));
    }

    match name.to_ascii_lowercase().as_str() {
        "space" => key(0x0020, "space"),
        "return" | "enter" => key(0xff0d, "Return"),
        "escape" | "esc" => key(0xff1b, "Escape"),
        "tab" => key(0xff09, "Tab"),
        "backspace" => key(0xff08, "BackSpace"),
        "delete" | "del" => key(0xffff, "Delete"),
        "insert" => key(0xff63, "Insert"),
        "home" => key(0xff50, "Home"),
        "end" => key(0xff57, "End"),
        "pageup" | "page_up" => key(0xff55, "Page_Up"),
        "pagedown" | "page_down" => key(0xff56, "Page_Down"),
        "up" => key(0xff52, "Up"),
        "down" => key(0xff54, "Down"),
        "left" => key(0xff51, "Left"),
        "right" => key(0xff53, "Right"),
        "plus" => key(0x002b, "plus"),
        "minus" | "-" => key(0x002d, "minus"),
        "=" => key(0x003d, "equal"),
        "," => key(0x002c, "comma"),
        "." => key(0x002e, "period"),
        "/" => key(0x002f, "slash"),
        ";" => key(0x003b, "semicolon"),
        "'" => key(0x0027, "apostrophe"),
        "[" => key(0x005b, "bracketleft"),
        "]" => key(0x005d, "bracketright"),
        "\\" => key(0x005c, "backslash"),
        "`" => key(0x0060, "grave"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_combo() {
        let acc = Accelerator::parse("Ctrl+Shift+Space").unwrap();
        assert!(acc.modifiers.ctrl);
        assert!(acc.modifiers.shift);
        assert!(!acc.modifiers.alt);
        assert!(!acc.modifiers.logo);
        assert_eq!(acc.key.keysym, 0x0020);
        assert_eq!(acc.to_xdg_trigger(), "CTRL+SHIFT+space");
    }

    #[test]
    fn command_or_control_maps_to_ctrl() {
        let acc = Accelerator::parse("CommandOrControl+Alt+K").unwrap();
        assert_eq!(acc.to_xdg_trigger(), "CTRL+ALT+k");
        let acc = Accelerator::parse("CmdOrCtrl+1").unwrap();
        assert_eq!(acc.to_xdg_trigger(), "CTRL+1");
    }

    #[test]
    fn trigger_modifier_order_is_fixed() {
        let acc = Accelerator::parse("Super+Shift+Alt+Ctrl+F12").unwrap();
        assert_eq!(acc.to_xdg_trigger(), "CTRL+ALT+SHIFT+LOGO+F12");
    }

    #[test]
    fn bare_function_key_allowed() {
        let acc = Accelerator::parse("F13").unwrap();
        assert!(acc.modifiers.is_empty());
        assert_eq!(acc.key.keysym, 0xffca);
        assert_eq!(acc.to_xdg_trigger(), "F13");
    }

    #[test]
    fn bare_letter_rejected() {
        assert_eq!(
            Accelerator::parse("A"),
            Err(AcceleratorError::MissingModifier("A".into()))
        );
    }

    #[test]
    fn unknown_parts_rejected() {
        assert_eq!(
            Accelerator::parse("Hyper+A"),
            Err(AcceleratorError::UnknownModifier("Hyper".into()))
        );
        assert_eq!(
            Accelerator::parse("Ctrl+FooBar"),
            Err(AcceleratorError::UnknownKey("FooBar".into()))
        );
        assert!(matches!(
            Accelerator::parse("Ctrl+"),
            Err(AcceleratorError::UnknownKey(_))
        ));
        assert_eq!(Accelerator::parse("   "), Err(AcceleratorError::Empty));
    }

    #[test]
    fn named_keys() {
        assert_eq!(parse_key("Enter").unwrap().name, "Return");
        assert_eq!(parse_key("PageUp").unwrap().keysym, 0xff55);
        assert_eq!(parse_key("Plus").unwrap().name, "plus");
        assert_eq!(parse_key("esc").unwrap().keysym, 0xff1b);
        assert_eq!(parse_key("F25"), None);
        assert_eq!(parse_key("F0"), None);
    }

    #[test]
    fn letters_lowercased() {
        let k = parse_key("Z").unwrap();
        assert_eq!(k.keysym, 0x7a);
        assert_eq!(k.name, "z");
    }
}
