//! Arena
//!
//! Node allocators used while a single tree is grown. [`NodeArena`] hands out
//! nodes from large fixed-size chunks and drops them all at once on
//! [`NodeAllocator::reset`]; [`HeapAllocator`] boxes every node so that nodes can
//! be freed one by one, which pruning needs. Both follow the same contract:
//! `allocate` returns the handle of a zero initialized node of the requested kind.
use crate::constants::ARENA_CHUNK_PAIRS;
use crate::errors::CanopyError;
use crate::node::{NodeId, NodeKind, TreeNode};

/// Allocation contract shared by the arena and the heap allocator.
pub trait NodeAllocator: Send {
    /// Allocate a zero initialized node.
    fn allocate(&mut self, kind: NodeKind) -> Result<NodeId, CanopyError>;
    fn get(&self, id: NodeId) -> Option<&TreeNode>;
    fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode>;
    /// Invalidate every handle returned so far.
    fn reset(&mut self);
    /// Number of live nodes.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allocators able to release a single node.
pub trait NodeDeallocator: NodeAllocator {
    fn deallocate(&mut self, id: NodeId) -> Result<(), CanopyError>;
}

fn handle(index: usize) -> Result<NodeId, CanopyError> {
    u32::try_from(index)
        .map(NodeId)
        .map_err(|_| CanopyError::MemoryAllocationFailed(format!("node handle {} does not fit in 32 bits", index)))
}

/// Bump allocator over fixed-size chunks of nodes.
#[derive(Debug)]
pub struct NodeArena {
    chunks: Vec<Vec<TreeNode>>,
    chunk_capacity: usize,
    used: usize,
}

impl Default for NodeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeArena {
    pub fn new() -> Self {
        Self::with_chunk_pairs(ARENA_CHUNK_PAIRS)
    }

    /// An arena whose chunks hold `pairs` split and leaf node pairs.
    pub fn with_chunk_pairs(pairs: usize) -> Self {
        NodeArena {
            chunks: Vec::new(),
            chunk_capacity: 2 * pairs.max(1),
            used: 0,
        }
    }

    /// Number of chunks currently held, live or not.
    pub fn n_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    /// Release the underlying chunks.
    pub fn destroy(&mut self) {
        self.chunks = Vec::new();
        self.used = 0;
    }

    fn new_chunk(&mut self) -> Result<(), CanopyError> {
        let mut chunk: Vec<TreeNode> = Vec::new();
        chunk.try_reserve_exact(self.chunk_capacity).map_err(|e| {
            CanopyError::MemoryAllocationFailed(format!("arena chunk of {} nodes: {}", self.chunk_capacity, e))
        })?;
        self.chunks.push(chunk);
        Ok(())
    }
}

impl NodeAllocator for NodeArena {
    fn allocate(&mut self, kind: NodeKind) -> Result<NodeId, CanopyError> {
        let id = handle(self.used)?;
        let (chunk, offset) = (self.used / self.chunk_capacity, self.used % self.chunk_capacity);
        if chunk == self.chunks.len() {
            self.new_chunk()?;
        }
        let nodes = &mut self.chunks[chunk];
        if offset < nodes.len() {
            // Slot left over from before the last reset.
            nodes[offset] = TreeNode::zeroed(kind);
        } else {
            nodes.push(TreeNode::zeroed(kind));
        }
        self.used += 1;
        Ok(id)
    }

    #[inline]
    fn get(&self, id: NodeId) -> Option<&TreeNode> {
        let i = id.index();
        if i >= self.used {
            return None;
        }
        self.chunks[i / self.chunk_capacity].get(i % self.chunk_capacity)
    }

    #[inline]
    fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        let i = id.index();
        if i >= self.used {
            return None;
        }
        self.chunks[i / self.chunk_capacity].get_mut(i % self.chunk_capacity)
    }

    fn reset(&mut self) {
        self.used = 0;
    }

    fn len(&self) -> usize {
        self.used
    }
}

/// One heap allocation per node, with a free list of released handles.
#[derive(Debug, Default)]
pub struct HeapAllocator {
    nodes: Vec<Option<Box<TreeNode>>>,
    free: Vec<u32>,
    live: usize,
}

impl HeapAllocator {
    pub fn new() -> Self {
        HeapAllocator::default()
    }
}

impl NodeAllocator for HeapAllocator {
    fn allocate(&mut self, kind: NodeKind) -> Result<NodeId, CanopyError> {
        let node = Box::new(TreeNode::zeroed(kind));
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = Some(node);
                NodeId(slot)
            }
            None => {
                let id = handle(self.nodes.len())?;
                self.nodes.push(Some(node));
                id
            }
        };
        self.live += 1;
        Ok(id)
    }

    fn get(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.index()).and_then(|n| n.as_deref())
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id.index()).and_then(|n| n.as_deref_mut())
    }

    fn reset(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.live = 0;
    }

    fn len(&self) -> usize {
        self.live
    }
}

impl NodeDeallocator for HeapAllocator {
    fn deallocate(&mut self, id: NodeId) -> Result<(), CanopyError> {
        match self.nodes.get_mut(id.index()).and_then(|n| n.take()) {
            Some(_) => {
                self.free.push(id.0);
                self.live -= 1;
                Ok(())
            }
            None => Err(CanopyError::NullPointer(format!("node {} is not allocated", id.0))),
        }
    }
}
