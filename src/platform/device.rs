//! Device traits that change how breaks may interrupt content

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceKind {
    #[default]
    Desktop,
    IPhone,
    IPad,
}

/// What the engine needs to know about the device hosting the player.
///
/// iPhones hand video to the native fullscreen player, so a preroll can only
/// be shown if content has not progressed past the preroll window. All iOS
/// devices have an unreliable media clock, which is why interactive ads are
/// guarded against manual seeking there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
}

impl DeviceProfile {
    pub fn desktop() -> Self {
        Self {
            kind: DeviceKind::Desktop,
        }
    }

    pub fn iphone() -> Self {
        Self {
            kind: DeviceKind::IPhone,
        }
    }

    pub fn ipad() -> Self {
        Self {
            kind: DeviceKind::IPad,
        }
    }

    /// Restricted preroll window applies
    pub fn is_iphone(&self) -> bool {
        self.kind == DeviceKind::IPhone
    }

    /// Media clock is unreliable
    pub fn is_idevice(&self) -> bool {
        matches!(self.kind, DeviceKind::IPhone | DeviceKind::IPad)
    }
}

impl std::str::FromStr for DeviceProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "desktop" => Ok(Self::desktop()),
            "iphone" => Ok(Self::iphone()),
            "ipad" => Ok(Self::ipad()),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_flags() {
        assert!(!DeviceProfile::desktop().is_idevice());
        assert!(DeviceProfile::iphone().is_iphone());
        assert!(DeviceProfile::iphone().is_idevice());
        assert!(DeviceProfile::ipad().is_idevice());
        assert!(!DeviceProfile::ipad().is_iphone());
        assert_eq!(DeviceProfile::default(), DeviceProfile::desktop());
    }

    #[test]
    fn parse_device_names() {
        assert_eq!("iPhone".parse::<DeviceProfile>().unwrap(), DeviceProfile::iphone());
        assert!("android".parse::<DeviceProfile>().is_err());
    }
}
