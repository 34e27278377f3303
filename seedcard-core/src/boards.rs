//! Supported manufacturers, boards and the distro each one ships.

use once_cell::sync::Lazy;
use seedcard_error::ValidationError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Manufacturer {
    HardKernel,
    NextThingCo,
    RaspberryPi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Board {
    OdroidC1,
    Chip,
    ChipPro,
    PocketChip,
    /// Every Raspberry Pi model boots the same image.
    RaspberryPi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Distro {
    Ubuntu,
    DebianHeadless,
    RaspbianLite,
}

struct ManufacturerSpec {
    manufacturer: Manufacturer,
    name: &'static str,
    /// First entry is the default board.
    boards: &'static [Board],
    distro: Distro,
    user: &'static str,
    hostname: &'static str,
}

static MANUFACTURERS: Lazy<Vec<ManufacturerSpec>> = Lazy::new(|| {
    vec![
        ManufacturerSpec {
            manufacturer: Manufacturer::HardKernel,
            name: "hardkernel",
            boards: &[Board::OdroidC1],
            distro: Distro::Ubuntu,
            user: "odroid",
            hostname: "odroid",
        },
        ManufacturerSpec {
            manufacturer: Manufacturer::NextThingCo,
            name: "ntc",
            boards: &[Board::Chip, Board::ChipPro, Board::PocketChip],
            distro: Distro::DebianHeadless,
            user: "chip",
            hostname: "chip",
        },
        ManufacturerSpec {
            manufacturer: Manufacturer::RaspberryPi,
            name: "raspberrypi",
            boards: &[Board::RaspberryPi],
            distro: Distro::RaspbianLite,
            user: "pi",
            hostname: "raspberrypi",
        },
    ]
});

static BOARD_NAMES: &[(Board, &str)] = &[
    (Board::OdroidC1, "odroidc1"),
    (Board::Chip, "chip"),
    (Board::ChipPro, "chippro"),
    (Board::PocketChip, "pocketchip"),
    (Board::RaspberryPi, "raspberrypi"),
];

impl Manufacturer {
    pub fn all() -> &'static [Manufacturer] {
        &[
            Manufacturer::HardKernel,
            Manufacturer::NextThingCo,
            Manufacturer::RaspberryPi,
        ]
    }

    fn spec(&self) -> &'static ManufacturerSpec {
        // The table covers every variant.
        MANUFACTURERS
            .iter()
            .find(|s| s.manufacturer == *self)
            .unwrap_or(&MANUFACTURERS[0])
    }

    pub fn name(&self) -> &'static str {
        self.spec().name
    }

    pub fn boards(&self) -> &'static [Board] {
        self.spec().boards
    }

    pub fn default_board(&self) -> Board {
        self.boards()[0]
    }

    pub fn distro(&self) -> Distro {
        self.spec().distro
    }

    pub fn default_user(&self) -> &'static str {
        self.spec().user
    }

    pub fn default_hostname(&self) -> &'static str {
        self.spec().hostname
    }
}

impl Board {
    pub fn all() -> impl Iterator<Item = Board> {
        BOARD_NAMES.iter().map(|(b, _)| *b)
    }

    pub fn name(&self) -> &'static str {
        BOARD_NAMES
            .iter()
            .find(|(b, _)| b == self)
            .map(|(_, n)| *n)
            .unwrap_or("unknown")
    }

    pub fn manufacturer(&self) -> Manufacturer {
        match self {
            Board::OdroidC1 => Manufacturer::HardKernel,
            Board::Chip | Board::ChipPro | Board::PocketChip => Manufacturer::NextThingCo,
            Board::RaspberryPi => Manufacturer::RaspberryPi,
        }
    }
}

impl Distro {
    pub fn name(&self) -> &'static str {
        match self {
            Distro::Ubuntu => "ubuntu",
            Distro::DebianHeadless => "debian-headless",
            Distro::RaspbianLite => "raspbian-lite",
        }
    }

    pub fn is_raspbian(&self) -> bool {
        matches!(self, Distro::RaspbianLite)
    }

    /// Raspbian copies `/boot/wpa_supplicant.conf` into place on boot; the
    /// others need the Wi-Fi settings passed to the first-boot script.
    pub fn auto_loads_wpa_supplicant(&self) -> bool {
        self.is_raspbian()
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Manufacturer {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MANUFACTURERS
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(s))
            .map(|spec| spec.manufacturer)
            .ok_or_else(|| {
                let names: Vec<_> = MANUFACTURERS.iter().map(|m| m.name).collect();
                ValidationError::Option(format!(
                    "unsupported manufacturer '{}' (one of: {})",
                    s,
                    names.join(", ")
                ))
            })
    }
}

impl FromStr for Board {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BOARD_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(board, _)| *board)
            .ok_or_else(|| {
                let names: Vec<_> = BOARD_NAMES.iter().map(|(_, n)| *n).collect();
                ValidationError::Option(format!(
                    "unsupported board '{}' (one of: {})",
                    s,
                    names.join(", ")
                ))
            })
    }
}

/// A fully resolved target: who made it, which board, which image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub manufacturer: Manufacturer,
    pub board: Board,
    pub distro: Distro,
}

impl Target {
    /// Fills in whichever of manufacturer or board is missing.
    pub fn resolve(
        manufacturer: Option<Manufacturer>,
        board: Option<Board>,
    ) -> Result<Self, ValidationError> {
        let (manufacturer, board) = match (manufacturer, board) {
            (None, None) => {
                return Err(ValidationError::Option(
                    "specify at least one of manufacturer or board".into(),
                ))
            }
            (None, Some(board)) => (board.manufacturer(), board),
            (Some(m), None) => (m, m.default_board()),
            (Some(m), Some(board)) => {
                if board.manufacturer() != m {
                    return Err(ValidationError::Option(format!(
                        "board {} is not made by {}",
                        board, m
                    )));
                }
                (m, board)
            }
        };
        Ok(Self {
            manufacturer,
            board,
            distro: manufacturer.distro(),
        })
    }

    pub fn default_user(&self) -> &'static str {
        self.manufacturer.default_user()
    }

    pub fn default_hostname(&self) -> &'static str {
        self.manufacturer.default_hostname()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.manufacturer, self.board, self.distro)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_alone_resolves_its_manufacturer() {
        let target = Target::resolve(None, Some(Board::PocketChip)).unwrap();
        assert_eq!(target.manufacturer, Manufacturer::NextThingCo);
        assert_eq!(target.distro, Distro::DebianHeadless);
        assert_eq!(target.to_string(), "ntc:pocketchip:debian-headless");
    }

    #[test]
    fn manufacturer_alone_picks_first_board() {
        let target = Target::resolve(Some(Manufacturer::NextThingCo), None).unwrap();
        assert_eq!(target.board, Board::Chip);
    }

    #[test]
    fn mismatched_board_is_rejected() {
        assert!(Target::resolve(Some(Manufacturer::HardKernel), Some(Board::Chip)).is_err());
        assert!(Target::resolve(None, None).is_err());
    }

    #[test]
    fn default_accounts_follow_manufacturer() {
        let odroid = Target::resolve(Some(Manufacturer::HardKernel), None).unwrap();
        assert_eq!(odroid.default_user(), "odroid");
        assert_eq!(odroid.default_hostname(), "odroid");
        let chip = Target::resolve(None, Some(Board::ChipPro)).unwrap();
        assert_eq!(chip.default_user(), "chip");
        let pi = Target::resolve(None, Some(Board::RaspberryPi)).unwrap();
        assert_eq!((pi.default_user(), pi.default_hostname()), ("pi", "raspberrypi"));
        assert!(pi.distro.auto_loads_wpa_supplicant());
    }

    #[test]
    fn names_parse_back() {
        for board in Board::all() {
            assert_eq!(board.name().parse::<Board>().unwrap(), board);
        }
        for m in Manufacturer::all() {
            assert_eq!(m.name().parse::<Manufacturer>().unwrap(), *m);
        }
        assert!("beaglebone".parse::<Board>().is_err());
    }
}
