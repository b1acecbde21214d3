//! MCP46x1 quad/dual volatile digital potentiometer over I2C.
//!
//! The board carries two of these. Volatile wipers 0 and 1 live at registers
//! `0x00`/`0x01`, wipers 2 and 3 at `0x06`/`0x07`.

use embedded_hal_async::i2c::I2c;

use super::{DigitalPot, PotAddress, PotChip};

pub const MCP1_ADDRESS: u8 = 0x2E;
pub const MCP2_ADDRESS: u8 = 0x2F;

const CMD_READ: u8 = 0x0C;

/// Both digipots on the analog board, sharing one I2C device handle.
pub struct Mcp46x1Pair<I> {
    i2c: I,
    addresses: [u8; 2],
}

impl<I: I2c> Mcp46x1Pair<I> {
    pub fn new(i2c: I) -> Self {
        Self::with_addresses(i2c, MCP1_ADDRESS, MCP2_ADDRESS)
    }

    pub fn with_addresses(i2c: I, mcp1: u8, mcp2: u8) -> Self {
        Self {
            i2c,
            addresses: [mcp1, mcp2],
        }
    }

    fn bus_address(&self, chip: PotChip) -> u8 {
        match chip {
            PotChip::Mcp1 => self.addresses[0],
            PotChip::Mcp2 => self.addresses[1],
        }
    }
}

impl<I: I2c> DigitalPot for Mcp46x1Pair<I> {
    type Error = I::Error;

    async fn write_wiper(&mut self, pot: PotAddress, code: u16) -> Result<(), Self::Error> {
        let frame = [
            (pot.register << 4) | ((code >> 8) & 0x03) as u8,
            (code & 0xFF) as u8,
        ];
        let address = self.bus_address(pot.chip);
        self.i2c.write(address, &frame).await
    }

    async fn read_wiper(&mut self, pot: PotAddress) -> Result<u16, Self::Error> {
        let mut data = [0u8; 2];
        let address = self.bus_address(pot.chip);
        self.i2c
            .write_read(address, &[(pot.register << 4) | CMD_READ], &mut data)
            .await?;
        Ok((u16::from(data[0] & 0x01) << 8) | u16::from(data[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use embassy_futures::block_on;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTransaction};

    #[test]
    fn test_write_packs_high_bits_into_command() {
        let expectations = [
            I2cTransaction::write(MCP1_ADDRESS, vec![0x61, 0x00]),
            I2cTransaction::write(MCP2_ADDRESS, vec![0x10, 0xAB]),
        ];
        let mut i2c = I2cMock::new(&expectations);
        let mut pots = Mcp46x1Pair::new(i2c.clone());

        block_on(pots.write_wiper(PotAddress::new(PotChip::Mcp1, 6), 256)).unwrap();
        block_on(pots.write_wiper(PotAddress::new(PotChip::Mcp2, 1), 0xAB)).unwrap();

        i2c.done();
    }

    #[test]
    fn test_read_decodes_nine_bit_wiper() {
        let expectations = [
            I2cTransaction::write_read(MCP1_ADDRESS, vec![0x7C], vec![0xFF, 0x00]),
            I2cTransaction::write_read(MCP1_ADDRESS, vec![0x0C], vec![0x00, 0xAB]),
        ];
        let mut i2c = I2cMock::new(&expectations);
        let mut pots = Mcp46x1Pair::new(i2c.clone());

        assert_eq!(block_on(pots.read_wiper(PotAddress::new(PotChip::Mcp1, 7))).unwrap(), 256);
        assert_eq!(block_on(pots.read_wiper(PotAddress::new(PotChip::Mcp1, 0))).unwrap(), 0xAB);

        i2c.done();
    }
}
