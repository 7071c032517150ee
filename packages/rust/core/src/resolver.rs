//! One-hop relationship resolution.
//!
//! Given a node id, finds the relationships that leave it (forward) and the
//! ones that point at it (reverse), plus the objects on the other end of
//! each edge. Resolution never recurses past direct neighbours.

use std::collections::HashMap;

use stixkit_shared::{StixCommon, StixObject};

/// Lookup tables over one corpus, built once and shared across queries.
#[derive(Debug)]
pub struct ObjectIndex<'a> {
    objects: &'a [StixObject],
    /// id -> position of the first object carrying it.
    by_id: HashMap<&'a str, usize>,
    /// source_ref -> relationship positions, in corpus order.
    outgoing: HashMap<&'a str, Vec<usize>>,
    /// target_ref -> relationship positions, in corpus order.
    incoming: HashMap<&'a str, Vec<usize>>,
}

/// Edges and neighbours of one node.
#[derive(Debug, Default)]
pub struct Resolution<'a> {
    /// Forward relationships followed by reverse relationships.
    pub relationships: Vec<&'a StixObject>,
    /// Resolved forward targets followed by resolved reverse sources, in the
    /// order of the relationships that reached them. May contain repeats.
    pub related: Vec<&'a StixObject>,
    /// How many entries of `relationships` are forward edges.
    pub forward: usize,
    /// Edge endpoints that name no object in the corpus.
    pub dangling: usize,
}

impl<'a> ObjectIndex<'a> {
    pub fn build(objects: &'a [StixObject]) -> Self {
        let mut by_id = HashMap::with_capacity(objects.len());
        let mut outgoing: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<&str, Vec<usize>> = HashMap::new();

        for (pos, obj) in objects.iter().enumerate() {
            let id = obj.id();
            if !id.is_empty() {
                by_id.entry(id).or_insert(pos);
            }
            if let Some(rel) = obj.as_relationship() {
                outgoing.entry(rel.source_ref).or_default().push(pos);
                incoming.entry(rel.target_ref).or_default().push(pos);
            }
        }

        Self {
            objects,
            by_id,
            outgoing,
            incoming,
        }
    }

    /// Look up an object by id.
    pub fn get(&self, id: &str) -> Option<&'a StixObject> {
        let objects = self.objects;
        self.by_id.get(id).map(|&pos| &objects[pos])
    }

    /// Resolve the 1-hop neighbourhood of `source_id`.
    pub fn resolve(&self, source_id: &str) -> Resolution<'a> {
        let forward = self.edges(&self.outgoing, source_id);
        let reverse = self.edges(&self.incoming, source_id);

        let mut resolution = Resolution {
            relationships: Vec::with_capacity(forward.len() + reverse.len()),
            related: Vec::with_capacity(forward.len() + reverse.len()),
            forward: forward.len(),
            dangling: 0,
        };

        let forward_ends = forward
            .iter()
            .filter_map(|rel| rel.as_relationship().map(|r| r.target_ref));
        let reverse_ends = reverse
            .iter()
            .filter_map(|rel| rel.as_relationship().map(|r| r.source_ref));

        for end in forward_ends.chain(reverse_ends) {
            match self.get(end) {
                Some(obj) => resolution.related.push(obj),
                None => resolution.dangling += 1,
            }
        }

        resolution.relationships.extend(forward);
        resolution.relationships.extend(reverse);
        resolution
    }

    fn edges(&self, table: &HashMap<&'a str, Vec<usize>>, id: &str) -> Vec<&'a StixObject> {
        let objects = self.objects;
        table
            .get(id)
            .map(|positions| positions.iter().map(|&pos| &objects[pos]).collect())
            .unwrap_or_default()
    }
}

/// Resolve `source_id` against `objects` without keeping an index around.
pub fn resolve<'a>(objects: &'a [StixObject], source_id: &str) -> Resolution<'a> {
    ObjectIndex::build(objects).resolve(source_id)
}
