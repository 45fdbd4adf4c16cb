use radix_trie::{Trie, TrieCommon};
use simple_dns::{rdata::RData, Name, ResourceRecord, QCLASS, QTYPE, TYPE};

/// Longest CNAME chain followed inside the zone
const MAX_ALIAS_DEPTH: usize = 8;

/// In memory records served by [`SimpleNameserver`](crate::SimpleNameserver)
#[derive(Debug)]
pub struct Zone {
    records: Trie<Vec<u8>, Vec<ResourceRecord<'static>>>,
}

/// Result of looking a question up in a [`Zone`]
#[derive(Debug, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Records answering the question, aliases first
    Answers(Vec<&'a ResourceRecord<'static>>),
    /// The name exists, but has no record of the requested type
    NoData,
    /// The name doesn't exist in the zone
    NotFound,
}

impl Zone {
    /// Creates an empty zone
    pub fn new() -> Self {
        Self {
            records: Trie::new(),
        }
    }

    /// Register a Resource Record
    pub fn add_record(&mut self, record: ResourceRecord<'static>) {
        let key = get_key(&record.name);
        match self.records.get_mut(&key) {
            Some(records) => {
                if !records.contains(&record) {
                    records.push(record);
                }
            }
            None => {
                self.records.insert(key, vec![record]);
            }
        }
    }

    /// Remove every record owned by `name`
    pub fn remove_records(&mut self, name: &Name) {
        self.records.remove(&get_key(name));
    }

    /// Remove all resource records
    pub fn clear(&mut self) {
        self.records = Trie::new();
    }

    /// Number of names holding records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the zone holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the records answering `qname`, following CNAME records owned by the name
    pub fn lookup(&self, qname: &Name, qtype: QTYPE, qclass: QCLASS) -> Lookup<'_> {
        let mut key = get_key(qname);
        let mut answers = Vec::new();

        for _ in 0..MAX_ALIAS_DEPTH {
            let records = match self.records.get(&key) {
                Some(records) => records,
                None if answers.is_empty() && self.has_descendants(&key) => return Lookup::NoData,
                None if answers.is_empty() => return Lookup::NotFound,
                None => break,
            };

            let matching: Vec<_> = records
                .iter()
                .filter(|record| record.match_qclass(qclass) && record.match_qtype(qtype))
                .collect();
            if !matching.is_empty() {
                answers.extend(matching);
                break;
            }

            let alias = records.iter().find(|record| {
                record.match_qclass(qclass) && matches!(record.rdata, RData::CNAME(_))
            });
            match alias {
                Some(alias) if qtype != QTYPE::TYPE(TYPE::CNAME) => {
                    answers.push(alias);
                    if let RData::CNAME(target) = &alias.rdata {
                        key = get_key(&target.0);
                    }
                }
                _ => break,
            }
        }

        if answers.is_empty() {
            Lookup::NoData
        } else {
            Lookup::Answers(answers)
        }
    }

    /// Names below `key` make it an existing, empty, name
    fn has_descendants(&self, key: &[u8]) -> bool {
        let mut prefix = key.to_vec();
        prefix.push(b'.');

        self.records
            .get_raw_descendant(&prefix)
            .map_or(false, |trie| {
                trie.iter()
                    .any(|(name, records)| name.starts_with(&prefix) && !records.is_empty())
            })
    }
}

impl Default for Zone {
    fn default() -> Self {
        Self::new()
    }
}

/// Labels in reverse order, lowercased, so subdomains share their parent's prefix
fn get_key(name: &Name) -> Vec<u8> {
    let name = name.to_string().to_ascii_lowercase();
    let labels: Vec<&str> = name.split('.').filter(|label| !label.is_empty()).rev().collect();
    labels.join(".").into_bytes()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use simple_dns::{
        rdata::{A, CNAME, TXT},
        CLASS,
    };

    use super::*;

    fn a_record(name: &'static str, address: Ipv4Addr) -> ResourceRecord<'static> {
        ResourceRecord::new(
            Name::new_unchecked(name),
            CLASS::IN,
            60,
            RData::A(A {
                address: address.into(),
            }),
        )
    }

    fn a_question() -> (QTYPE, QCLASS) {
        (QTYPE::TYPE(TYPE::A), QCLASS::CLASS(CLASS::IN))
    }

    #[test]
    pub fn test_add_record() {
        let mut zone = Zone::new();
        zone.add_record(a_record("a.test", Ipv4Addr::LOCALHOST));
        zone.add_record(a_record("a.test", Ipv4Addr::LOCALHOST));
        zone.add_record(a_record("A.TEST", Ipv4Addr::new(127, 0, 0, 2)));

        assert_eq!(1, zone.len());

        let (qtype, qclass) = a_question();
        match zone.lookup(&Name::new_unchecked("a.test"), qtype, qclass) {
            Lookup::Answers(records) => assert_eq!(2, records.len()),
            other => panic!("unexpected lookup {:?}", other),
        }
    }

    #[test]
    pub fn test_lookup_outcomes() {
        let mut zone = Zone::new();
        zone.add_record(a_record("host.sub.test", Ipv4Addr::LOCALHOST));
        zone.add_record(ResourceRecord::new(
            Name::new_unchecked("txt.test"),
            CLASS::IN,
            60,
            RData::TXT(TXT::new().with_string("version=1").unwrap()),
        ));

        let (qtype, qclass) = a_question();
        let lookup = |name: &'static str| zone.lookup(&Name::new_unchecked(name), qtype, qclass);

        assert!(matches!(lookup("host.sub.test"), Lookup::Answers(_)));
        assert_eq!(Lookup::NoData, lookup("txt.test"));
        assert_eq!(Lookup::NoData, lookup("sub.test"));
        assert_eq!(Lookup::NotFound, lookup("other.test"));
        assert_eq!(Lookup::NotFound, lookup("st.sub.test"));
    }

    #[test]
    pub fn test_lookup_follows_aliases() {
        let mut zone = Zone::new();
        zone.add_record(ResourceRecord::new(
            Name::new_unchecked("www.test"),
            CLASS::IN,
            60,
            RData::CNAME(CNAME(Name::new_unchecked("host.test"))),
        ));
        zone.add_record(a_record("host.test", Ipv4Addr::new(10, 0, 0, 7)));

        let (qtype, qclass) = a_question();
        match zone.lookup(&Name::new_unchecked("www.test"), qtype, qclass) {
            Lookup::Answers(records) => {
                assert_eq!(2, records.len());
                assert!(matches!(records[0].rdata, RData::CNAME(_)));
                assert!(matches!(records[1].rdata, RData::A(_)));
            }
            other => panic!("unexpected lookup {:?}", other),
        }

        zone.remove_records(&Name::new_unchecked("www.test"));
        assert_eq!(
            Lookup::NotFound,
            zone.lookup(&Name::new_unchecked("www.test"), qtype, qclass)
        );
    }
}
