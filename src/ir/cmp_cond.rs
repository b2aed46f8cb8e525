use bitflags::bitflags;

bitflags! {
    /// 整数比较条件.
    ///
    /// 低三位分别表示 "小于", "等于", "大于" 三种结果是否满足条件,
    /// 因此 `LE = LT | EQ`, `NE = LT | GT`, 以此类推.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CmpCond: u8 {
        const LT = 0b0_001;
        const EQ = 0b0_010;
        const GT = 0b0_100;
        const LE = 0b0_011;
        const NE = 0b0_101;
        const GE = 0b0_110;

        const ALWAYS = 0b0_111;
        const NEVER  = 0b0_000;

        /// 为 true 则为有符号比较, false 则为无符号比较.
        const SIGNED = 0b1_000;
    }
}

impl CmpCond {
    pub fn is_signed(&self) -> bool {
        self.contains(Self::SIGNED)
    }
    pub fn switch_to_signed(&self) -> Self {
        *self | Self::SIGNED
    }

    /// 获取不包含符号信息的基本比较条件.
    pub fn get_basic_cond(&self) -> Self {
        *self & Self::ALWAYS
    }

    pub fn eval_int(&self, lhs: i64, rhs: i64) -> bool {
        use std::cmp::Ordering;
        let ord = if self.is_signed() { lhs.cmp(&rhs) } else { (lhs as u64).cmp(&(rhs as u64)) };
        let bit = match ord {
            Ordering::Less => Self::LT,
            Ordering::Equal => Self::EQ,
            Ordering::Greater => Self::GT,
        };
        self.contains(bit)
    }
}

impl std::fmt::Display for CmpCond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let basic_name = match self.get_basic_cond() {
            Self::LT => "lt",
            Self::EQ => return write!(f, "eq"),
            Self::GT => "gt",
            Self::LE => "le",
            Self::NE => return write!(f, "ne"),
            Self::GE => "ge",
            Self::ALWAYS => return write!(f, "true"),
            Self::NEVER => return write!(f, "false"),
            _ => unreachable!(),
        };
        if self.is_signed() {
            write!(f, "s{basic_name}")
        } else {
            write!(f, "u{basic_name}")
        }
    }
}
