//! HPACK header table (RFC 7541 Section 2.3)
//!
//! The static table of 61 well-known entries and the bounded dynamic
//! table together form the index space referenced by HPACK
//! representations. Index 1..=61 address the static table; 62 and up
//! address the dynamic table, newest entry first.

use std::collections::VecDeque;

/// Default dynamic table size (SETTINGS_HEADER_TABLE_SIZE default)
pub const DEFAULT_MAX_TABLE_SIZE: usize = 4096;

/// Per-entry overhead in the table size accounting (RFC 7541 Section 4.1)
pub const ENTRY_OVERHEAD: usize = 32;

/// Static table entries as defined in RFC 7541 Appendix A.
pub static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),                   // 1
    (":method", "GET"),                   // 2
    (":method", "POST"),                  // 3
    (":path", "/"),                       // 4
    (":path", "/index.html"),             // 5
    (":scheme", "http"),                  // 6
    (":scheme", "https"),                 // 7
    (":status", "200"),                   // 8
    (":status", "204"),                   // 9
    (":status", "206"),                   // 10
    (":status", "304"),                   // 11
    (":status", "400"),                   // 12
    (":status", "404"),                   // 13
    (":status", "500"),                   // 14
    ("accept-charset", ""),               // 15
    ("accept-encoding", "gzip, deflate"), // 16
    ("accept-language", ""),              // 17
    ("accept-ranges", ""),                // 18
    ("accept", ""),                       // 19
    ("access-control-allow-origin", ""),  // 20
    ("age", ""),                          // 21
    ("allow", ""),                        // 22
    ("authorization", ""),                // 23
    ("cache-control", ""),                // 24
    ("content-disposition", ""),          // 25
    ("content-encoding", ""),             // 26
    ("content-language", ""),             // 27
    ("content-length", ""),               // 28
    ("content-location", ""),             // 29
    ("content-range", ""),                // 30
    ("content-type", ""),                 // 31
    ("cookie", ""),                       // 32
    ("date", ""),                         // 33
    ("etag", ""),                         // 34
    ("expect", ""),                       // 35
    ("expires", ""),                      // 36
    ("from", ""),                         // 37
    ("host", ""),                         // 38
    ("if-match", ""),                     // 39
    ("if-modified-since", ""),            // 40
    ("if-none-match", ""),                // 41
    ("if-range", ""),                     // 42
    ("if-unmodified-since", ""),          // 43
    ("last-modified", ""),                // 44
    ("link", ""),                         // 45
    ("location", ""),                     // 46
    ("max-forwards", ""),                 // 47
    ("proxy-authenticate", ""),           // 48
    ("proxy-authorization", ""),          // 49
    ("range", ""),                        // 50
    ("referer", ""),                      // 51
    ("refresh", ""),                      // 52
    ("retry-after", ""),                  // 53
    ("server", ""),                       // 54
    ("set-cookie", ""),                   // 55
    ("strict-transport-security", ""),    // 56
    ("transfer-encoding", ""),            // 57
    ("user-agent", ""),                   // 58
    ("vary", ""),                         // 59
    ("via", ""),                          // 60
    ("www-authenticate", ""),             // 61
];

/// One dynamic table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

impl HeaderEntry {
    /// Size of an entry in table accounting
    pub fn size(&self) -> usize {
        entry_size(&self.name, &self.value)
    }
}

/// Size of a (name, value) pair in table accounting
pub fn entry_size(name: &str, value: &str) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

/// Static plus dynamic HPACK table
#[derive(Debug, Clone)]
pub struct HeaderTable {
    /// Newest entry at the front
    entries: VecDeque<HeaderEntry>,
    size: usize,
    max_size: usize,
}

impl HeaderTable {
    /// Create a table with the given dynamic size limit
    pub fn new(max_size: usize) -> Self {
        HeaderTable {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    /// Sum of the sizes of the dynamic entries
    pub fn dynamic_table_size(&self) -> usize {
        self.size
    }

    /// Current dynamic size limit
    pub fn max_dynamic_table_size(&self) -> usize {
        self.max_size
    }

    /// Number of dynamic entries
    pub fn dynamic_len(&self) -> usize {
        self.entries.len()
    }

    /// Insert an entry at the front, evicting from the oldest end until it
    /// fits. An entry larger than the whole table leaves the table empty.
    pub fn add(&mut self, name: &str, value: &str) {
        let new_size = entry_size(name, value);
        while self.size + new_size > self.max_size && !self.entries.is_empty() {
            self.evict_oldest();
        }
        if self.size + new_size > self.max_size {
            return;
        }
        self.entries.push_front(HeaderEntry {
            name: name.to_string(),
            value: value.to_string(),
        });
        self.size += new_size;
    }

    /// Change the dynamic size limit, evicting immediately to honor it
    pub fn set_max_dynamic_table_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        if let Some(entry) = self.entries.pop_back() {
            self.size -= entry.size();
        }
    }

    /// Find the best index for a header.
    ///
    /// Returns `(name_index, exact_index)`: an index whose name matches
    /// (0 if none) and an index matching both name and value (0 if none).
    /// The dynamic table is searched first, then the static table.
    pub fn get_index(&self, name: &str, value: &str) -> (usize, usize) {
        let mut name_index = 0;

        for (i, entry) in self.entries.iter().enumerate() {
            if entry.name.eq_ignore_ascii_case(name) {
                let index = STATIC_TABLE.len() + i + 1;
                if entry.value == value {
                    return (index, index);
                }
                if name_index == 0 {
                    name_index = index;
                }
            }
        }

        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if n.eq_ignore_ascii_case(name) {
                if *v == value {
                    return (i + 1, i + 1);
                }
                if name_index == 0 {
                    name_index = i + 1;
                }
            }
        }

        (name_index, 0)
    }

    /// Resolve an index to its (name, value) pair
    pub fn get_header(&self, index: usize) -> Option<(&str, &str)> {
        if index == 0 {
            return None;
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Some((name, value));
        }
        self.entries
            .get(index - STATIC_TABLE.len() - 1)
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TABLE_SIZE)
    }
}
