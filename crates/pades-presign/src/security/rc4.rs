//! RC4 keystream used by the V1/V2 security handlers.
//!
//! Kept in-crate because the key length is only known at runtime (5 to 16
//! bytes), which the RustCrypto `rc4` cipher fixes at compile time.

struct Rc4 {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    fn new(key: &[u8]) -> Self {
        let mut state = [0u8; 256];
        for (idx, slot) in state.iter_mut().enumerate() {
            *slot = idx as u8;
        }

        if !key.is_empty() {
            let mut j = 0u8;
            for idx in 0..256 {
                j = j.wrapping_add(state[idx]).wrapping_add(key[idx % key.len()]);
                state.swap(idx, j as usize);
            }
        }

        Self { state, i: 0, j: 0 }
    }

    fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let k = self.state[self.i as usize].wrapping_add(self.state[self.j as usize]);
            *byte ^= self.state[k as usize];
        }
    }
}

/// Encrypt or decrypt `data` with RC4 (the operation is symmetric)
pub fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    Rc4::new(key).apply(&mut out);
    out
}
