//! Tile layer payload format
//!
//! A payload is a versioned header followed by three per-cell arrays:
//! surface heights, area ids (0 = unwalkable) and connection bits toward
//! the four cell neighbors. The header carries a byte-order tag; all
//! multi-byte fields after the tag are read in the tagged order. Payloads
//! handed to the cache are usually LZ4-compressed on top of this encoding.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::Cursor;
use tilenav_common::{Error, Result};

/// Magic bytes identifying a tile layer payload
pub const LAYER_MAGIC: [u8; 4] = *b"TNAV";

/// Version number of the payload format
pub const LAYER_VERSION: u16 = 1;

/// Size of the encoded header in bytes
pub const LAYER_HEADER_SIZE: usize = 48;

/// Area id marking an unwalkable cell
pub const NULL_AREA: u8 = 0;

/// Default area id for walkable cells
pub const WALKABLE_AREA: u8 = 63;

/// Connection bit toward the +x neighbor
pub const CON_POS_X: u8 = 0x01;
/// Connection bit toward the +z neighbor
pub const CON_POS_Z: u8 = 0x02;
/// Connection bit toward the -x neighbor
pub const CON_NEG_X: u8 = 0x04;
/// Connection bit toward the -z neighbor
pub const CON_NEG_Z: u8 = 0x08;
/// All four connection bits
pub const CON_ALL: u8 = 0x0F;

/// Byte order of a payload's multi-byte fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn tag(self) -> u8 {
        match self {
            ByteOrder::Little => 0,
            ByteOrder::Big => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ByteOrder::Little),
            1 => Ok(ByteOrder::Big),
            other => Err(Error::Decode(format!("unknown byte-order tag {other}"))),
        }
    }
}

/// Tile layer header
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct LayerHeader {
    /// Byte order of the payload body
    pub byte_order: ByteOrder,
    /// Emit mesh data the way the reference C implementation does
    /// (corner heights take the maximum of adjacent cells instead of the
    /// average)
    pub c_compatibility: bool,
    /// Tile grid position
    pub tx: i32,
    pub ty: i32,
    /// Layer index at the grid position
    pub tlayer: i32,
    /// World-space bounds of the tile
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    /// Grid width in cells (x axis)
    pub width: u16,
    /// Grid depth in cells (z axis)
    pub height: u16,
}

impl LayerHeader {
    /// Creates a header with zeroed position and bounds
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            byte_order: ByteOrder::Little,
            c_compatibility: true,
            tx: 0,
            ty: 0,
            tlayer: 0,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            width,
            height,
        }
    }

    /// Number of cells in the layer grid
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Serializes the header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(LAYER_HEADER_SIZE);
        bytes.extend_from_slice(&LAYER_MAGIC);
        bytes.push(self.byte_order.tag());
        bytes.push(self.c_compatibility as u8);
        match self.byte_order {
            ByteOrder::Little => self.write_body::<LittleEndian>(&mut bytes),
            ByteOrder::Big => self.write_body::<BigEndian>(&mut bytes),
        }
        bytes
    }

    fn write_body<B: byteorder::ByteOrder>(&self, bytes: &mut Vec<u8>) {
        let mut u16_buf = [0u8; 2];
        let mut u32_buf = [0u8; 4];

        B::write_u16(&mut u16_buf, LAYER_VERSION);
        bytes.extend_from_slice(&u16_buf);
        for v in [self.tx, self.ty, self.tlayer] {
            B::write_i32(&mut u32_buf, v);
            bytes.extend_from_slice(&u32_buf);
        }
        for v in self.bmin.iter().chain(self.bmax.iter()) {
            B::write_f32(&mut u32_buf, *v);
            bytes.extend_from_slice(&u32_buf);
        }
        B::write_u16(&mut u16_buf, self.width);
        bytes.extend_from_slice(&u16_buf);
        B::write_u16(&mut u16_buf, self.height);
        bytes.extend_from_slice(&u16_buf);
    }

    /// Deserializes a header from the start of a payload
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LAYER_HEADER_SIZE {
            return Err(Error::Decode(format!(
                "payload too short for header: {} bytes",
                data.len()
            )));
        }
        if data[0..4] != LAYER_MAGIC {
            return Err(Error::Decode("bad payload magic".to_string()));
        }
        let byte_order = ByteOrder::from_tag(data[4])?;
        let c_compatibility = data[5] != 0;

        let mut cursor = Cursor::new(&data[6..LAYER_HEADER_SIZE]);
        match byte_order {
            ByteOrder::Little => {
                Self::read_body::<LittleEndian>(&mut cursor, byte_order, c_compatibility)
            }
            ByteOrder::Big => Self::read_body::<BigEndian>(&mut cursor, byte_order, c_compatibility),
        }
    }

    fn read_body<B: byteorder::ByteOrder>(
        cursor: &mut Cursor<&[u8]>,
        byte_order: ByteOrder,
        c_compatibility: bool,
    ) -> Result<Self> {
        let read_err = |_| Error::Decode("truncated header".to_string());
        let version = cursor.read_u16::<B>().map_err(read_err)?;
        if version != LAYER_VERSION {
            return Err(Error::Decode(format!("unsupported version {version}")));
        }
        let tx = cursor.read_i32::<B>().map_err(read_err)?;
        let ty = cursor.read_i32::<B>().map_err(read_err)?;
        let tlayer = cursor.read_i32::<B>().map_err(read_err)?;
        let mut bmin = [0.0f32; 3];
        let mut bmax = [0.0f32; 3];
        for v in bmin.iter_mut().chain(bmax.iter_mut()) {
            *v = cursor.read_f32::<B>().map_err(read_err)?;
        }
        let width = cursor.read_u16::<B>().map_err(read_err)?;
        let height = cursor.read_u16::<B>().map_err(read_err)?;
        if width == 0 || height == 0 {
            return Err(Error::Decode("zero layer dimensions".to_string()));
        }
        Ok(Self {
            byte_order,
            c_compatibility,
            tx,
            ty,
            tlayer,
            bmin,
            bmax,
            width,
            height,
        })
    }
}

/// Decoded tile layer: header plus per-cell arrays
#[derive(Debug, Clone)]
pub struct LayerData {
    pub header: LayerHeader,
    /// Surface height of each cell, in cell-height units above `bmin[1]`
    pub heights: Vec<u8>,
    /// Area id of each cell; [`NULL_AREA`] marks unwalkable cells
    pub areas: Vec<u8>,
    /// Connection bits of each cell toward its four neighbors
    pub cons: Vec<u8>,
}

impl LayerData {
    /// Creates an empty (fully unwalkable) layer for the given header
    pub fn new(header: LayerHeader) -> Self {
        let cells = header.cell_count();
        Self {
            header,
            heights: vec![0; cells],
            areas: vec![NULL_AREA; cells],
            cons: vec![0; cells],
        }
    }

    /// Cell index for grid coordinates
    #[inline]
    pub fn index(&self, x: usize, z: usize) -> usize {
        z * self.header.width as usize + x
    }

    /// Checks whether a cell is walkable
    #[inline]
    pub fn is_walkable(&self, x: usize, z: usize) -> bool {
        self.areas[self.index(x, z)] != NULL_AREA
    }

    /// Checks whether two adjacent cells are connected in direction
    /// `(dx, dz)` (one of the four axis steps)
    pub fn is_connected(&self, x: usize, z: usize, dx: isize, dz: isize) -> bool {
        let (nx, nz) = (x as isize + dx, z as isize + dz);
        if nx < 0 || nz < 0 || nx >= self.header.width as isize || nz >= self.header.height as isize
        {
            return false;
        }
        if !self.is_walkable(x, z) || !self.is_walkable(nx as usize, nz as usize) {
            return false;
        }
        let bit = match (dx, dz) {
            (1, 0) => CON_POS_X,
            (0, 1) => CON_POS_Z,
            (-1, 0) => CON_NEG_X,
            (0, -1) => CON_NEG_Z,
            _ => return false,
        };
        self.cons[self.index(x, z)] & bit != 0
    }

    /// Serializes the layer
    pub fn to_bytes(&self) -> Vec<u8> {
        let cells = self.header.cell_count();
        let mut bytes = Vec::with_capacity(LAYER_HEADER_SIZE + cells * 3);
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.heights);
        bytes.extend_from_slice(&self.areas);
        bytes.extend_from_slice(&self.cons);
        bytes
    }

    /// Deserializes a full layer; the arrays must match the header's cell
    /// count exactly
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = LayerHeader::from_bytes(data)?;
        let cells = header.cell_count();
        let expected = LAYER_HEADER_SIZE + cells * 3;
        if data.len() != expected {
            return Err(Error::Decode(format!(
                "payload size {} does not match expected {expected}",
                data.len()
            )));
        }
        let mut offset = LAYER_HEADER_SIZE;
        let heights = data[offset..offset + cells].to_vec();
        offset += cells;
        let areas = data[offset..offset + cells].to_vec();
        offset += cells;
        let cons = data[offset..offset + cells].to_vec();
        Ok(Self {
            header,
            heights,
            areas,
            cons,
        })
    }
}

/// Detects a payload's byte order from the raw header bytes without a full
/// decode
pub fn detect_byte_order(data: &[u8]) -> Result<ByteOrder> {
    if data.len() < 5 || data[0..4] != LAYER_MAGIC {
        return Err(Error::Decode("bad payload magic".to_string()));
    }
    ByteOrder::from_tag(data[4])
}
